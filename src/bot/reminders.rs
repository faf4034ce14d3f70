// src/bot/reminders.rs - Timed reminders delivered back to their origin channel

use anyhow::Result;
use chrono::{DateTime, Months, Utc};
use log::{debug, error, info};
use std::sync::Arc;

use crate::config::SettingsStore;
use crate::platforms::PlatformConnection;
use crate::storage::{Database, ScheduledReminder};
use crate::types::{user_mention, BotError, ChatMessage, Embed, OutgoingMessage, Snowflake};

use super::duration::parse_duration;
use super::responses::{self, NEUTRAL_COLOR};

pub const REMINDERS_PER_PAGE: usize = 5;

const ADD_ERROR_TITLE: &str = "Unable to add reminder";

fn mentions_line(ids: &[Snowflake]) -> String {
    ids.iter().map(|id| format!("{} ", user_mention(*id))).collect()
}

pub struct ReminderSystem {
    db: Database,
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
}

impl ReminderSystem {
    pub fn new(db: Database, platform: Arc<dyn PlatformConnection>, settings: SettingsStore) -> Self {
        Self { db, platform, settings }
    }

    /// Non-bot users mentioned by the command, without the owner and without repeats.
    pub fn recipients(message: &ChatMessage) -> Vec<Snowflake> {
        let mut ids = Vec::new();
        for user in &message.mentions {
            if !user.is_bot && user.id != message.author.id && !ids.contains(&user.id) {
                ids.push(user.id);
            }
        }
        ids
    }

    /// Schedule a reminder owned by the author of `message`, returning the confirmation embed.
    pub async fn add_reminder(&self, message: &ChatMessage, args: &str) -> Result<Embed> {
        let max_months = self.settings.get().await.max_reminder_time_months;
        let issued_at = message.timestamp;
        let parsed = parse_duration(args, issued_at);

        if !parsed.has_time(issued_at) {
            return Err(BotError::validation(
                ADD_ERROR_TITLE,
                "I was unable able to add the reminder you gave me. You didn't supply me a valid time...",
            )
            .into());
        }

        let horizon = issued_at
            .checked_add_months(Months::new(max_months))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if parsed.trigger > horizon {
            return Err(BotError::validation(
                ADD_ERROR_TITLE,
                format!(
                    "I was unable able to add the reminder you gave me. That's more than {} month{} away...",
                    max_months,
                    if max_months == 1 { "" } else { "s" }
                ),
            )
            .into());
        }

        let reminder = ScheduledReminder {
            token: message.id.to_string(),
            owner_id: message.author.id,
            channel_id: message.channel_id,
            text: parsed.message_or_default(),
            trigger_minute: responses::datetime_to_minute(parsed.trigger),
            mentions: Self::recipients(message),
        };
        self.db.insert_reminder(&reminder)?;
        info!(
            "Added reminder {} for {} at minute {}",
            reminder.token, reminder.owner_id, reminder.trigger_minute
        );

        let mut embed = responses::positive("Add reminder", &message.author.mention(), "I added the reminder you gave me!")
            .field("User", message.author.mention(), true)
            .field("Time (UTC)", responses::format_date(parsed.trigger), true)
            .field("Remaining time", responses::format_remaining(parsed.trigger, issued_at), true)
            .field("Notification Identifier", reminder.token.clone(), false);
        if !reminder.mentions.is_empty() {
            embed = embed.field("Users to mention", mentions_line(&reminder.mentions), false);
        }
        Ok(embed)
    }

    pub fn remove_reminder(&self, mention: &str, token: &str, now: DateTime<Utc>) -> Result<Embed> {
        let not_found = || {
            BotError::not_found(
                "Unable to remove reminder",
                format!("The reminder id `{}` does not exist...", token),
            )
        };

        let reminder = self.db.get_reminder(token)?.ok_or_else(not_found)?;
        if !self.db.remove_reminder(token)? {
            return Err(not_found().into());
        }
        info!("Removed reminder {}", token);

        let trigger = responses::minute_to_datetime(reminder.trigger_minute);
        let mut embed = responses::positive("Removed reminder", mention, "I was able to remove the reminder you gave me!")
            .field("User", user_mention(reminder.owner_id), true)
            .field("Time (UTC)", responses::format_date(trigger), true)
            .field("Notification Identifier", reminder.token.clone(), false);
        if !reminder.mentions.is_empty() {
            embed = embed.field("Users to mention", mentions_line(&reminder.mentions), false);
        }
        Ok(embed
            .field("Remaining time", responses::format_remaining(trigger, now), false)
            .field("Message", reminder.text, false))
    }

    pub fn list_embed(&self, mention: &str, page: usize, now: DateTime<Utc>) -> Result<Embed> {
        let reminders = self.db.list_reminders()?;
        if reminders.is_empty() {
            return Ok(responses::neutral("Reminders", mention, "there are no reminders."));
        }

        let (items, page, total_pages) = responses::paginate(&reminders, page, REMINDERS_PER_PAGE);
        let mut embed = Embed::new(format!("Reminders Page {}/{}", page, total_pages))
            .color(NEUTRAL_COLOR)
            .description(format!(
                "{}, **Showing {} reminders out of a total of {}.**",
                mention,
                items.len(),
                reminders.len()
            ));

        for reminder in items {
            let trigger = responses::minute_to_datetime(reminder.trigger_minute);
            let mut value = format!("{}: {}\n", user_mention(reminder.owner_id), reminder.text);
            if !reminder.mentions.is_empty() {
                value.push_str(&format!("**Users to mention:** {}\n", mentions_line(&reminder.mentions)));
            }
            value.push_str(&format!("**Id:** {}\n", reminder.token));
            value.push_str(&format!("**Remaining time:** {}", responses::format_remaining(trigger, now)));
            embed = embed.field(responses::format_date(trigger), value, false);
        }
        Ok(embed)
    }

    /// Deliver every reminder due at `now`, claiming each row by token first.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.db.due_reminders(responses::datetime_to_minute(now))?;
        let mut fired = 0;

        for reminder in due {
            if !self.db.remove_reminder(&reminder.token)? {
                debug!("Reminder {} already claimed", reminder.token);
                continue;
            }
            fired += 1;

            let trigger = responses::minute_to_datetime(reminder.trigger_minute);
            let embed = Embed::new("Notification")
                .color(NEUTRAL_COLOR)
                .description(reminder.text.clone())
                .field("Late by", responses::format_late_by(now - trigger), false);

            let mut content = user_mention(reminder.owner_id);
            for id in &reminder.mentions {
                content.push(' ');
                content.push_str(&user_mention(*id));
            }

            let outgoing = OutgoingMessage::text(content).with_embed(embed);
            if let Err(e) = self.platform.send_message(reminder.channel_id, &outgoing).await {
                error!("Failed to deliver reminder {}: {}", reminder.token, e);
            }
        }

        if fired > 0 {
            info!("Delivered {} reminders", fired);
        }
        Ok(fired)
    }
}
