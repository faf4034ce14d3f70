use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::platforms::PlatformConnection;
use crate::types::BotError;

use super::commands::{CommandContext, CommandHandler};
use super::permissions::PrivilegeTier;
use super::reminders::ReminderSystem;

pub struct ReminderCommands {
    reminders: Arc<ReminderSystem>,
    platform: Arc<dyn PlatformConnection>,
}

impl ReminderCommands {
    pub fn new(reminders: Arc<ReminderSystem>, platform: Arc<dyn PlatformConnection>) -> Self {
        Self { reminders, platform }
    }
}

#[async_trait]
impl CommandHandler for ReminderCommands {
    /// `reminder new|add <time> <text>`, `reminder remove|delete <id>`, `reminder list [page]`
    async fn process_command(&self, ctx: &CommandContext<'_>) -> Result<bool> {
        if ctx.name != "reminder" {
            return Ok(false);
        }
        if !ctx.require(PrivilegeTier::CommunitySupport)? {
            return Ok(true);
        }

        let mention = ctx.author_mention();
        let subcommand = ctx.arg(0).map(str::to_lowercase).unwrap_or_default();
        let embed = match subcommand.as_str() {
            "new" | "add" => self.reminders.add_reminder(ctx.message, ctx.rest_after(1)).await?,
            "remove" | "delete" => self
                .reminders
                .remove_reminder(&mention, ctx.rest_after(1).trim(), Utc::now())?,
            "list" => {
                let page = ctx.arg(1).and_then(|p| p.parse().ok()).unwrap_or(1);
                self.reminders.list_embed(&mention, page, Utc::now())?
            }
            _ => {
                return Err(BotError::InvalidArguments(
                    "usage: `reminder new <time> <message>`, `reminder remove <id>` or `reminder list [page]`".to_string(),
                )
                .into())
            }
        };

        ctx.reply(self.platform.as_ref(), embed).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::permissions::UserPermissions;
    use crate::config::{BotSettings, SettingsStore};
    use crate::platforms::testing::{test_message, test_user, FakePlatform};
    use crate::storage::Database;

    #[tokio::test]
    async fn test_reminder_round_trip_through_commands() {
        let platform = Arc::new(FakePlatform::new());
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::with_settings(dir.path().join("settings.yaml"), BotSettings::default());
        let commands = ReminderCommands::new(
            Arc::new(ReminderSystem::new(db.clone(), platform.clone(), settings)),
            platform.clone(),
        );
        let perms = UserPermissions {
            highest: PrivilegeTier::CommunitySupport,
            muted: false,
        };

        let add = test_message(321, 8, test_user(10), "~reminder add 1 week check the logs");
        commands
            .process_command(&CommandContext::parse(&add, "~", perms).unwrap())
            .await
            .unwrap();
        assert_eq!(db.get_reminder("321").unwrap().unwrap().text, "check the logs");

        let remove = test_message(322, 8, test_user(10), "~reminder delete 321");
        commands
            .process_command(&CommandContext::parse(&remove, "~", perms).unwrap())
            .await
            .unwrap();
        assert!(db.list_reminders().unwrap().is_empty());

        let titles: Vec<_> = platform
            .sent_to(8)
            .await
            .into_iter()
            .map(|m| m.embeds[0].title.clone().unwrap_or_default())
            .collect();
        assert_eq!(titles, vec!["Add reminder", "Removed reminder"]);

        let bad = test_message(323, 8, test_user(10), "~reminder");
        let err = commands
            .process_command(&CommandContext::parse(&bad, "~", perms).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BotError>(), Some(BotError::InvalidArguments(_))));
    }
}
