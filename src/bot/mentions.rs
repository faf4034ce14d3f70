//! Mention auditing in the action channel.
//!
//! When staff log an action that mentions a member, the auditor looks back
//! through the channel history and reports how often that member has been
//! mentioned within the configured window.

use anyhow::Result;
use chrono::{DateTime, Months, Utc};
use log::{debug, info, warn};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tokio::time::Duration;

use crate::config::SettingsStore;
use crate::platforms::PlatformConnection;
use crate::types::{channel_mention, user_mention, ChatMessage, Embed, OutgoingMessage, Snowflake};

use super::permissions::{PrivilegeTier, UserPermissions};
use super::responses::{self, NEGATIVE_COLOR, NEUTRAL_COLOR, TOO_MANY_LINKS};

pub const HISTORY_PAGE_SIZE: usize = 2000;
pub const PAGE_DELAY: Duration = Duration::from_millis(500);
const MAX_DESCRIPTION: usize = 2000;
const MAX_LOOKUP_FIELDS: usize = 10;
const MAX_FIELD_VALUE: usize = 1000;

fn mention_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"<@!?(\d{17,})>").expect("mention regex is valid"))
}

/// Raw user mentions in `content`, first occurrence order, without repeats.
pub fn extract_mentions(content: &str) -> Vec<Snowflake> {
    let mut ids = Vec::new();
    for caps in mention_regex().captures_iter(content) {
        if let Some(id) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Messages mentioning one user, newest first.
#[derive(Debug, Clone)]
pub struct MentionHits {
    pub user_id: Snowflake,
    pub messages: Vec<ChatMessage>,
}

pub struct MentionAuditor {
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
    page_size: usize,
    page_delay: Duration,
}

impl MentionAuditor {
    pub fn new(platform: Arc<dyn PlatformConnection>, settings: SettingsStore) -> Self {
        Self {
            platform,
            settings,
            page_size: HISTORY_PAGE_SIZE,
            page_delay: PAGE_DELAY,
        }
    }

    /// Page backward through `channel_id` collecting messages that mention each user.
    ///
    /// Scanning stops at the first message older than the window, so history is
    /// assumed to be returned in chronological order.
    pub async fn query_mentions(
        &self,
        user_ids: &[Snowflake],
        channel_id: Snowflake,
        window_months: u32,
        before: Option<Snowflake>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MentionHits>> {
        let window_start = now
            .checked_sub_months(Months::new(window_months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut hits: Vec<MentionHits> = user_ids
            .iter()
            .map(|id| MentionHits {
                user_id: *id,
                messages: Vec::new(),
            })
            .collect();

        let mut cursor = before;
        loop {
            let page = self
                .platform
                .get_messages_before(channel_id, cursor, self.page_size)
                .await?;

            let mut exceeded = false;
            for message in &page {
                if message.timestamp < window_start {
                    exceeded = true;
                    break;
                }
                for hit in hits.iter_mut() {
                    if message.mentions_user(hit.user_id) {
                        hit.messages.push(message.clone());
                    }
                }
            }

            if exceeded || page.len() < self.page_size {
                break;
            }
            cursor = page.last().map(|m| m.id);
            tokio::time::sleep(self.page_delay).await;
        }

        Ok(hits)
    }

    /// Mentioned users worth auditing: not staff (Community Support or above) and not bots.
    /// Users who can no longer be resolved are kept.
    async fn audit_candidates(&self, guild_id: Option<Snowflake>, ids: Vec<Snowflake>) -> Vec<Snowflake> {
        let Some(guild_id) = guild_id else {
            return ids;
        };
        let role_map = self.settings.get().await.role_map;

        let mut candidates = Vec::new();
        for id in ids {
            match self.platform.get_member(guild_id, id).await {
                Ok(Some(member)) => {
                    let perms = UserPermissions::from_roles(&member.roles, &role_map);
                    if !perms.is_at_least(PrivilegeTier::CommunitySupport) && !member.user.is_bot {
                        candidates.push(id);
                    }
                }
                Ok(None) => candidates.push(id),
                Err(e) => {
                    debug!("Member lookup for {} failed, keeping it: {}", id, e);
                    candidates.push(id);
                }
            }
        }
        candidates
    }

    pub async fn handle_message_created(&self, message: &ChatMessage) -> Result<()> {
        let settings = self.settings.get().await;
        if !settings.auto_warn_snoop_enabled || message.channel_id != settings.action_channel_id {
            return Ok(());
        }

        let candidates = self
            .audit_candidates(message.guild_id, extract_mentions(&message.content))
            .await;
        self.audit(message, candidates).await
    }

    /// Only mentions added by the edit are audited.
    pub async fn handle_message_updated(&self, before: Option<&ChatMessage>, after: &ChatMessage) -> Result<()> {
        let settings = self.settings.get().await;
        if !settings.auto_warn_snoop_enabled || after.channel_id != settings.action_channel_id {
            return Ok(());
        }
        let Some(before) = before else {
            return Ok(());
        };
        if self.platform.current_user_id().await == Some(after.author.id) {
            return Ok(());
        }

        let previous = extract_mentions(&before.content);
        let added: Vec<Snowflake> = extract_mentions(&after.content)
            .into_iter()
            .filter(|id| !previous.contains(id))
            .collect();
        self.audit(after, added).await
    }

    async fn audit(&self, message: &ChatMessage, user_ids: Vec<Snowflake>) -> Result<()> {
        if user_ids.is_empty() {
            return Ok(());
        }
        let months = self.settings.get().await.max_action_age_months;
        debug!("Auditing mentions of {:?} in channel {}", user_ids, message.channel_id);

        let hits = self
            .query_mentions(&user_ids, message.channel_id, months, Some(message.id), Utc::now())
            .await?;
        for hit in hits.iter().filter(|h| !h.messages.is_empty()) {
            let embed = Self::previous_mentions_embed(hit, message.channel_id, months);
            self.platform
                .send_message(message.channel_id, &OutgoingMessage::embed(embed))
                .await?;
        }
        Ok(())
    }

    pub fn previous_mentions_embed(hit: &MentionHits, channel_id: Snowflake, months: u32) -> Embed {
        let count = hit.messages.len();
        let plural = if count == 1 { "" } else { "s" };
        let header = format!(
            "__**{} has had {} total mention{} (including the most recent one) in {} in the last {} months:**__\n",
            user_mention(hit.user_id),
            count + 1,
            plural,
            channel_mention(channel_id),
            months
        );
        let links: Vec<String> = hit.messages.iter().map(|m| m.url()).collect();
        let list = responses::limited_link_list(&links, TOO_MANY_LINKS, MAX_DESCRIPTION.saturating_sub(header.len()));

        Embed::new(format!("Previous mention{} found", plural))
            .color(NEGATIVE_COLOR)
            .description(format!("{}{}", header, list))
    }

    /// Look up `user_ids` in the action channel on demand, one embed per user.
    pub async fn lookup(&self, invoker_mention: &str, user_ids: &[Snowflake], trigger: &ChatMessage) -> Result<Vec<Embed>> {
        let settings = self.settings.get().await;
        let channel_id = settings.action_channel_id;
        let months = settings.max_action_age_months;

        let mut unique = Vec::new();
        for id in user_ids {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }

        let before = (trigger.channel_id == channel_id).then_some(trigger.id);
        let hits = self.query_mentions(&unique, channel_id, months, before, Utc::now()).await?;
        info!("Mention lookup for {} users by {}", unique.len(), trigger.author.id);

        let total = hits.len();
        Ok(hits
            .iter()
            .enumerate()
            .map(|(i, hit)| Self::lookup_embed(invoker_mention, hit, channel_id, months).footer(format!("Page {}/{}", i + 1, total)))
            .collect())
    }

    fn lookup_embed(invoker_mention: &str, hit: &MentionHits, channel_id: Snowflake, months: u32) -> Embed {
        let count = hit.messages.len();
        if count == 0 {
            return Embed::new("Mentions found in action logs").color(NEUTRAL_COLOR).description(format!(
                "{}, I did not find any mentions for {}. Good for them...",
                invoker_mention,
                user_mention(hit.user_id)
            ));
        }

        let mut embed = Embed::new("Mentions found in action logs").color(NEGATIVE_COLOR).description(format!(
            "{}, I found {} mention{} for {} in {} in the last {} months. {}",
            invoker_mention,
            count,
            if count == 1 { "" } else { "s" },
            user_mention(hit.user_id),
            channel_mention(channel_id),
            months,
            if count > MAX_LOOKUP_FIELDS {
                format!("There are over {}. I will only show the most recent.", MAX_LOOKUP_FIELDS)
            } else {
                String::new()
            }
        ));

        for message in hit.messages.iter().take(MAX_LOOKUP_FIELDS) {
            embed = embed.field(
                format!("Action on {}", responses::format_date(message.timestamp)),
                Self::action_field(message),
                false,
            );
        }
        embed
    }

    /// Message content trimmed so the attachment and jump links always fit.
    fn action_field(message: &ChatMessage) -> String {
        const LONG_MESSAGE: &str = ". . . Unable to preview long message...";

        let content = format!("{}: {}", user_mention(message.author.id), message.content);
        let mut footer = String::new();
        if let Some(attachment) = message.attachments.first() {
            footer.push_str(&format!("\n\n**There is an image attached:** [Image]({})", attachment.url));
        }
        footer.push_str(&format!("\n\n[Link]({})", message.url()));

        let content_len = content.chars().count();
        let footer_len = footer.chars().count();
        if content_len + footer_len <= MAX_FIELD_VALUE {
            return format!("{}{}", content, footer);
        }

        let budget = MAX_FIELD_VALUE.saturating_sub(footer_len + LONG_MESSAGE.chars().count());
        if budget == 0 {
            warn!("Action field footer alone exceeds the field limit for message {}", message.id);
        }
        format!("{}{}{}", responses::truncate_chars(&content, budget), LONG_MESSAGE, footer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BotSettings, RoleMap};
    use crate::platforms::testing::{test_bot, test_member, test_message, test_user, FakePlatform};

    const ACTION: Snowflake = 44;
    const USER_A: Snowflake = 111_111_111_111_111_111;
    const USER_B: Snowflake = 222_222_222_222_222_222;
    const STAFF: Snowflake = 333_333_333_333_333_333;

    fn auditor(platform: Arc<FakePlatform>, dir: &tempfile::TempDir) -> MentionAuditor {
        let settings = SettingsStore::with_settings(
            dir.path().join("settings.yaml"),
            BotSettings {
                action_channel_id: ACTION,
                auto_warn_snoop_enabled: true,
                role_map: RoleMap {
                    community_support: vec![3],
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        MentionAuditor::new(platform, settings)
    }

    #[test]
    fn test_extract_mentions() {
        let content = format!("<@{}> and <@!{}> again <@{}> short <@123>", USER_A, USER_B, USER_A);
        assert_eq!(extract_mentions(&content), vec![USER_A, USER_B]);
    }

    #[tokio::test]
    async fn test_query_respects_window_and_excluded_message() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let auditor = auditor(platform.clone(), &dir);
        let now = Utc::now();

        let mut old = test_message(10, ACTION, test_user(1), &format!("warned <@{}>", USER_A));
        old.timestamp = now - chrono::Duration::days(400);
        platform.add_message(old).await;
        platform
            .add_message(test_message(11, ACTION, test_user(1), &format!("muted <@{}>", USER_A)))
            .await;
        platform.add_message(test_message(12, ACTION, test_user(1), "unrelated")).await;
        platform
            .add_message(test_message(13, ACTION, test_user(1), &format!("again <@{}>", USER_A)))
            .await;

        let hits = auditor
            .query_mentions(&[USER_A, USER_B], ACTION, 6, Some(13), now)
            .await
            .unwrap();
        assert_eq!(hits[0].messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![11]);
        assert!(hits[1].messages.is_empty());
    }

    #[tokio::test]
    async fn test_query_pages_until_short_page() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let mut auditor = auditor(platform.clone(), &dir);
        auditor.page_size = 2;
        auditor.page_delay = Duration::from_millis(1);

        for id in 1..=5 {
            platform
                .add_message(test_message(id, ACTION, test_user(1), &format!("<@{}>", USER_A)))
                .await;
        }

        let hits = auditor.query_mentions(&[USER_A], ACTION, 6, None, Utc::now()).await.unwrap();
        assert_eq!(hits[0].messages.len(), 5);
        assert_eq!(platform.state.lock().await.history_requests, 3);
    }

    #[tokio::test]
    async fn test_new_action_reports_previous_mentions() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let auditor = auditor(platform.clone(), &dir);

        platform.add_member(test_member(test_user(STAFF), vec![3])).await;
        platform
            .add_message(test_message(20, ACTION, test_user(1), &format!("warned <@{}> <@{}>", USER_A, STAFF)))
            .await;
        let trigger = test_message(21, ACTION, test_user(1), &format!("muted <@{}> by <@{}>", USER_A, STAFF));
        platform.add_message(trigger.clone()).await;

        auditor.handle_message_created(&trigger).await.unwrap();

        let sent = platform.sent_to(ACTION).await;
        assert_eq!(sent.len(), 1);
        let embed = &sent[0].embeds[0];
        assert_eq!(embed.title.as_deref(), Some("Previous mention found"));
        let description = embed.description.as_deref().unwrap();
        assert!(description.starts_with(&format!("__**<@{}> has had 2 total mention (including", USER_A)));
        assert!(description.ends_with("/44/20"));
    }

    #[tokio::test]
    async fn test_edit_only_audits_added_mentions() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let auditor = auditor(platform.clone(), &dir);
        platform.add_member(test_member(test_bot(USER_B), vec![])).await;

        platform
            .add_message(test_message(30, ACTION, test_user(1), &format!("<@{}>", USER_A)))
            .await;
        let before = test_message(31, ACTION, test_user(1), &format!("<@{}>", USER_A));
        let after = test_message(31, ACTION, test_user(1), &format!("<@{}>", USER_A));

        auditor.handle_message_updated(Some(&before), &after).await.unwrap();
        auditor.handle_message_updated(None, &after).await.unwrap();
        assert!(platform.sent_to(ACTION).await.is_empty());

        let before = test_message(31, ACTION, test_user(1), "nothing yet");
        auditor.handle_message_updated(Some(&before), &after).await.unwrap();
        assert_eq!(platform.sent_to(ACTION).await.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_builds_one_embed_per_user() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let auditor = auditor(platform.clone(), &dir);
        platform
            .add_message(test_message(40, ACTION, test_user(1), &format!("<@{}> {}", USER_A, "x".repeat(1500))))
            .await;

        let command = test_message(41, 9, test_user(2), "~mentions");
        let embeds = auditor.lookup("<@2>", &[USER_A, USER_B, USER_A], &command).await.unwrap();
        assert_eq!(embeds.len(), 2);
        assert_eq!(embeds[0].fields.len(), 1);
        assert!(embeds[0].fields[0].value.contains("Unable to preview long message"));
        assert!(embeds[0].fields[0].value.chars().count() <= 1000);
        assert!(embeds[1].description.as_deref().unwrap().contains("Good for them..."));
        assert_eq!(embeds[1].footer.as_deref(), Some("Page 2/2"));
    }
}
