// src/bot/admission.rs - Entry channel screening and colonist promotion

use anyhow::Result;
use chrono::Duration;
use log::{debug, info};
use moka::sync::Cache;
use std::sync::Arc;

use crate::config::SettingsStore;
use crate::platforms::PlatformConnection;
use crate::types::{ChatMessage, EmojiData, GuildMember, OutgoingMessage, Snowflake};

use super::filter::FilterEngine;
use super::responses;

const ADMITTED_EMOJI: &str = "✅";

/// Outcome of screening one message in the admission channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Ignored,
    Rejected,
    AlreadyAdmitted,
    Granted(Snowflake),
}

/// Screens intros in the admission channel and promotes levelled members.
///
/// Users already seen as new accounts, and users already promoted, are
/// remembered in bounded caches that expire after `cache_ttl_hours`.
pub struct AdmissionSystem {
    filter: Arc<FilterEngine>,
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
    new_accounts: Cache<Snowflake, ()>,
    checked: Cache<Snowflake, ()>,
}

impl AdmissionSystem {
    pub async fn new(filter: Arc<FilterEngine>, platform: Arc<dyn PlatformConnection>, settings: SettingsStore) -> Self {
        let config = settings.get().await.admission;
        let build_cache = || {
            Cache::builder()
                .max_capacity(config.cache_capacity as u64)
                .time_to_live(std::time::Duration::from_secs(config.cache_ttl_hours.max(1) as u64 * 3600))
                .build()
        };

        Self {
            filter,
            platform,
            settings,
            new_accounts: build_cache(),
            checked: build_cache(),
        }
    }

    pub async fn handle_message_created(&self, message: &ChatMessage) -> Result<Admission> {
        let config = self.settings.get().await.admission;
        let Some(guild_id) = message.guild_id else {
            return Ok(Admission::Ignored);
        };
        if config.channel_id == 0
            || message.channel_id != config.channel_id
            || message.author.is_bot
            || !message.kind.is_user_content()
        {
            return Ok(Admission::Ignored);
        }

        let Some(member) = self.platform.get_member(guild_id, message.author.id).await? else {
            return Ok(Admission::Ignored);
        };

        let screened = format!("{}\n{}", member.display_name(), message.content);
        let (bad_words, _) = self.filter.get_bad_words(&screened).await;
        if !bad_words.is_empty() {
            info!("Admission rejected for {}: {:?}", member.user.id, bad_words);
            let warning = responses::apply_template(&config.rejection_message, &member.user.mention());
            self.platform
                .send_message(message.channel_id, &OutgoingMessage::text(warning))
                .await?;
            return Ok(Admission::Rejected);
        }

        let joined = member.joined_at.unwrap_or(message.timestamp);
        let cutoff = joined - Duration::days(config.account_age_cutoff_days);
        let seen_as_new = self.new_accounts.contains_key(&member.user.id);

        let role_id = if seen_as_new || member.user.created_at() >= cutoff {
            self.new_accounts.insert(member.user.id, ());
            config.new_account_role_id
        } else {
            config.colonist_role_id
        };

        if role_id == 0 || member.has_role(role_id) {
            return Ok(Admission::AlreadyAdmitted);
        }

        self.platform.add_role(guild_id, member.user.id, role_id).await?;
        self.platform
            .add_reaction(message.channel_id, message.id, &EmojiData::unicode(ADMITTED_EMOJI))
            .await?;
        info!("Admitted {} with role {}", member.user.id, role_id);
        Ok(Admission::Granted(role_id))
    }

    /// Promote a member who just reached the level role to colonist.
    pub async fn handle_member_updated(&self, roles_before: &[Snowflake], member: &GuildMember) -> Result<()> {
        let gained_role = member.roles.iter().any(|r| !roles_before.contains(r));
        if !gained_role || self.checked.contains_key(&member.user.id) {
            return Ok(());
        }

        let config = self.settings.get().await.admission;
        if config.colonist_role_id == 0 || config.level_role_id == 0 {
            return Ok(());
        }

        if member.has_role(config.colonist_role_id) {
            self.checked.insert(member.user.id, ());
            return Ok(());
        }
        if !member.has_role(config.level_role_id) {
            return Ok(());
        }

        self.platform
            .add_role(member.guild_id, member.user.id, config.colonist_role_id)
            .await?;
        if config.new_account_role_id != 0 && member.has_role(config.new_account_role_id) {
            self.platform
                .remove_role(member.guild_id, member.user.id, config.new_account_role_id)
                .await?;
        }
        self.checked.insert(member.user.id, ());
        debug!("Promoted {} to colonist after levelling", member.user.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdmissionSettings, BotSettings};
    use crate::platforms::testing::{test_member, test_message, test_user, FakePlatform, TEST_GUILD};
    use crate::storage::{Database, FilterKind};
    use chrono::Utc;

    const GATE: Snowflake = 12;
    const NEW_ROLE: Snowflake = 81;
    const COLONIST: Snowflake = 82;
    const LEVEL: Snowflake = 83;

    // Snowflake for roughly 2019-01-01, well past any cutoff
    const OLD_USER: Snowflake = 529_000_000_000_000_000;

    async fn setup(platform: Arc<FakePlatform>, dir: &tempfile::TempDir) -> AdmissionSystem {
        let db = Database::open_in_memory().unwrap();
        let filter = Arc::new(FilterEngine::new(db).await.unwrap());
        filter.add_rule(FilterKind::Mask, "badword").await.unwrap();
        let settings = SettingsStore::with_settings(
            dir.path().join("settings.yaml"),
            BotSettings {
                admission: AdmissionSettings {
                    channel_id: GATE,
                    new_account_role_id: NEW_ROLE,
                    colonist_role_id: COLONIST,
                    level_role_id: LEVEL,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        AdmissionSystem::new(filter, platform, settings).await
    }

    fn fresh_user_id() -> Snowflake {
        let ms = (Utc::now().timestamp_millis() - 1_420_070_400_000) as u64;
        ms << 22
    }

    #[tokio::test]
    async fn test_old_account_becomes_colonist() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let admission = setup(platform.clone(), &dir).await;
        platform.add_member(test_member(test_user(OLD_USER), vec![])).await;

        let message = test_message(1, GATE, test_user(OLD_USER), "hi, I play on console");
        assert_eq!(
            admission.handle_message_created(&message).await.unwrap(),
            Admission::Granted(COLONIST)
        );
        assert_eq!(
            admission.handle_message_created(&message).await.unwrap(),
            Admission::AlreadyAdmitted
        );

        let state = platform.state.lock().await;
        assert_eq!(state.role_grants, vec![(TEST_GUILD, OLD_USER, COLONIST)]);
        assert_eq!(state.reactions_added.len(), 1);
    }

    #[tokio::test]
    async fn test_new_account_and_rejection() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let admission = setup(platform.clone(), &dir).await;
        let fresh = fresh_user_id();
        platform.add_member(test_member(test_user(fresh), vec![])).await;

        let rude = test_message(1, GATE, test_user(fresh), "BADWORD hello");
        assert_eq!(admission.handle_message_created(&rude).await.unwrap(), Admission::Rejected);
        let warning = &platform.sent_to(GATE).await[0];
        assert!(warning.content.as_deref().unwrap().starts_with(&format!("<@{}> your display name", fresh)));

        let polite = test_message(2, GATE, test_user(fresh), "hello");
        assert_eq!(
            admission.handle_message_created(&polite).await.unwrap(),
            Admission::Granted(NEW_ROLE)
        );

        let elsewhere = test_message(3, GATE + 1, test_user(fresh), "hello");
        assert_eq!(admission.handle_message_created(&elsewhere).await.unwrap(), Admission::Ignored);
    }

    #[tokio::test]
    async fn test_level_role_promotes_once() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let admission = setup(platform.clone(), &dir).await;
        let member = test_member(test_user(OLD_USER), vec![NEW_ROLE, LEVEL]);
        platform.add_member(member.clone()).await;

        admission.handle_member_updated(&[NEW_ROLE], &member).await.unwrap();
        admission.handle_member_updated(&[NEW_ROLE], &member).await.unwrap();

        let state = platform.state.lock().await;
        assert_eq!(state.role_grants, vec![(TEST_GUILD, OLD_USER, COLONIST)]);
        assert_eq!(state.role_revokes, vec![(TEST_GUILD, OLD_USER, NEW_ROLE)]);
    }
}
