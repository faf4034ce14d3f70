// src/bot/mutes.rs - Timed mutes: scheduling, listing, removal and expiry

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::config::SettingsStore;
use crate::platforms::PlatformConnection;
use crate::storage::{Database, ScheduledMute};
use crate::types::{user_mention, BotError, Embed, GuildMember, OutgoingMessage, Snowflake};

use super::duration::parse_duration;
use super::responses::{self, NEUTRAL_COLOR, POSITIVE_COLOR};

pub const MUTES_PER_PAGE: usize = 5;

const ADD_ERROR_TITLE: &str = "Unable to add mute";

/// A request to mute `target_id`, issued by `staff_id` through message `token`.
#[derive(Debug, Clone)]
pub struct MuteRequest<'a> {
    pub guild_id: Snowflake,
    pub staff_id: Snowflake,
    pub target_id: Snowflake,
    /// Duration tokens followed by the reason.
    pub args: &'a str,
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MuteAdded {
    pub mute: ScheduledMute,
    pub overridden: bool,
    pub report: String,
}

pub struct MuteSystem {
    db: Database,
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
}

impl MuteSystem {
    pub fn new(db: Database, platform: Arc<dyn PlatformConnection>, settings: SettingsStore) -> Self {
        Self { db, platform, settings }
    }

    /// Validate, apply the mute role, replace any previous mute and report to the action channel.
    pub async fn add_mute(&self, request: MuteRequest<'_>) -> Result<MuteAdded> {
        let settings = self.settings.get().await;
        let parsed = parse_duration(request.args, request.issued_at);

        if !parsed.has_time(request.issued_at) {
            return Err(BotError::validation(
                ADD_ERROR_TITLE,
                "I was unable able to add the mute you gave me. You didn't supply me a valid time. The syntax is mute <mention> <time> <reason>.",
            )
            .into());
        }

        let max_days = settings.max_mute_time_days;
        if parsed.trigger > request.issued_at + Duration::days(i64::from(max_days)) {
            return Err(BotError::validation(
                ADD_ERROR_TITLE,
                format!(
                    "I was unable able to add the mute you gave me. That's more than {} day{} away...",
                    max_days,
                    if max_days == 1 { "" } else { "s" }
                ),
            )
            .into());
        }

        let role_id = *settings.mute_role_ids.get(&request.guild_id).ok_or_else(|| {
            BotError::validation(ADD_ERROR_TITLE, "there is no mute role configured for this server.")
        })?;

        if self.platform.get_member(request.guild_id, request.target_id).await?.is_none() {
            return Err(BotError::validation(
                ADD_ERROR_TITLE,
                format!("I couldn't find {} in this server.", user_mention(request.target_id)),
            )
            .into());
        }

        self.platform
            .add_role(request.guild_id, request.target_id, role_id)
            .await?;
        if let Err(e) = self.platform.disconnect_voice(request.guild_id, request.target_id).await {
            warn!("Failed to disconnect {} from voice: {}", request.target_id, e);
        }

        let mute = ScheduledMute {
            token: request.token,
            user_id: request.target_id,
            text: parsed.message_or_default(),
            trigger_minute: responses::datetime_to_minute(parsed.trigger),
            guild_id: request.guild_id,
        };
        let overridden = self.db.replace_user_mute(&mute)?;

        let report = format!(
            "**Muted User**: {}\nStaff: {}\nRemaining time: {}\nReason: {}{}",
            user_mention(mute.user_id),
            user_mention(request.staff_id),
            responses::format_remaining(parsed.trigger, request.issued_at),
            mute.text,
            if overridden { "\nNote: Overriding previous mute" } else { "" }
        );

        if settings.action_channel_id != 0 {
            self.platform
                .send_message(settings.action_channel_id, &OutgoingMessage::text(report.clone()))
                .await?;
        } else {
            warn!("No action channel configured, mute report not sent");
        }

        info!(
            "Muted {} in guild {} until minute {} (override: {})",
            mute.user_id, mute.guild_id, mute.trigger_minute, overridden
        );
        Ok(MuteAdded { mute, overridden, report })
    }

    /// One page of active mutes ordered by trigger time.
    pub fn list_embed(&self, mention: &str, page: usize, now: DateTime<Utc>) -> Result<Embed> {
        let mutes = self.db.list_mutes()?;
        if mutes.is_empty() {
            return Ok(responses::neutral("Mutes", mention, "there are no mutes."));
        }

        let (items, page, total_pages) = responses::paginate(&mutes, page, MUTES_PER_PAGE);
        let mut embed = Embed::new(format!("Mutes Page {}/{}", page, total_pages))
            .color(NEUTRAL_COLOR)
            .description(format!(
                "{}, **Showing {} mutes out of a total of {}.**",
                mention,
                items.len(),
                mutes.len()
            ));

        for mute in items {
            let trigger = responses::minute_to_datetime(mute.trigger_minute);
            embed = embed.field(
                responses::format_date(trigger),
                format!(
                    "{}: {}\n**Id:** {}\n**Remaining time:** {}",
                    user_mention(mute.user_id),
                    mute.text,
                    mute.token,
                    responses::format_remaining(trigger, now)
                ),
                false,
            );
        }
        Ok(embed)
    }

    /// Delete a mute by its token without touching the member's roles.
    pub fn remove_by_token(&self, token: &str) -> Result<ScheduledMute> {
        let not_found = || BotError::not_found("Unable to remove mute", format!("The mute id `{}` does not exist...", token));

        let mute = self.db.get_mute(token)?.ok_or_else(not_found)?;
        if !self.db.remove_mute(token)? {
            return Err(not_found().into());
        }
        info!("Removed mute {} for user {}", token, mute.user_id);
        Ok(mute)
    }

    pub fn removed_embed(mention: &str, mute: &ScheduledMute, now: DateTime<Utc>) -> Embed {
        let trigger = responses::minute_to_datetime(mute.trigger_minute);
        responses::positive("Removed mute", mention, "I was able to remove the mute you gave me!")
            .field("User", user_mention(mute.user_id), true)
            .field("Time (UTC)", responses::format_date(trigger), true)
            .field("Mute Identifier", mute.token.clone(), false)
            .field("Remaining time", responses::format_remaining(trigger, now), false)
            .field("Message", mute.text.clone(), false)
    }

    /// Drop every mute of the user in this guild and revoke the role if they are still here.
    pub async fn unmute(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<usize> {
        let removed = self.db.remove_user_mutes(user_id, guild_id)?;

        let role_id = self.settings.get().await.mute_role_ids.get(&guild_id).copied();
        if let Some(role_id) = role_id {
            if self.platform.get_member(guild_id, user_id).await?.is_some() {
                self.platform.remove_role(guild_id, user_id, role_id).await?;
            }
        }

        info!("Unmuted {} in guild {} ({} rows removed)", user_id, guild_id, removed);
        Ok(removed)
    }

    /// Re-apply the mute role to a member who rejoined while muted.
    pub async fn handle_member_added(&self, member: &GuildMember) -> Result<()> {
        if !self.db.user_is_muted(member.user.id, member.guild_id)? {
            return Ok(());
        }
        let Some(role_id) = self.settings.get().await.mute_role_ids.get(&member.guild_id).copied() else {
            warn!("Muted user {} rejoined but no mute role is configured", member.user.id);
            return Ok(());
        };

        info!("Muted user {} rejoined guild {}, restoring mute role", member.user.id, member.guild_id);
        self.platform.add_role(member.guild_id, member.user.id, role_id).await
    }

    /// Fire every mute due at `now`. Each row is claimed by token before its effect runs.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.db.due_mutes(responses::datetime_to_minute(now))?;
        if due.is_empty() {
            return Ok(0);
        }

        let settings = self.settings.get().await;
        let mut fired = 0;
        for mute in due {
            if !self.db.remove_mute(&mute.token)? {
                debug!("Mute {} already claimed", mute.token);
                continue;
            }
            fired += 1;

            let note = match settings.mute_role_ids.get(&mute.guild_id) {
                Some(role_id) => self.revoke_expired(&mute, *role_id).await,
                None => {
                    warn!("No mute role configured for guild {}", mute.guild_id);
                    Some("No mute role is configured, nothing was removed")
                }
            };

            let trigger = responses::minute_to_datetime(mute.trigger_minute);
            let mut embed = Embed::new("User Unmuted")
                .color(POSITIVE_COLOR)
                .description(user_mention(mute.user_id))
                .field("Late by", responses::format_late_by(now - trigger), false);
            if let Some(note) = note {
                embed = embed.field("Note", note, false);
            }

            if settings.action_channel_id == 0 {
                continue;
            }
            if let Err(e) = self
                .platform
                .send_message(settings.action_channel_id, &OutgoingMessage::embed(embed))
                .await
            {
                error!("Failed to report expired mute {}: {}", mute.token, e);
            }
        }

        info!("Expired {} mutes", fired);
        Ok(fired)
    }

    /// Take the mute role off an expired mute's member. Returns a note when it could not be done.
    async fn revoke_expired(&self, mute: &ScheduledMute, role_id: Snowflake) -> Option<&'static str> {
        match self.platform.get_member(mute.guild_id, mute.user_id).await {
            Ok(None) => return Some("User has left the server"),
            Ok(Some(_)) => {}
            Err(e) => warn!("Could not look up muted member {}: {}", mute.user_id, e),
        }

        match self.platform.remove_role(mute.guild_id, mute.user_id, role_id).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Could not revoke mute role from {}: {}", mute.user_id, e);
                Some("The mute role could not be removed")
            }
        }
    }
}
