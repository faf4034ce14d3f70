use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::platforms::PlatformConnection;
use crate::types::{channel_mention, message_url, BotError, EmojiData, Snowflake};

use super::commands::{parse_mention_id, CommandContext, CommandHandler};
use super::permissions::PrivilegeTier;
use super::responses;
use super::role_requests::{BindingRemoval, RoleRequestSystem};

const ROLE_COMMANDS: [&str; 5] = [
    "role-embed-create",
    "role-embed-append",
    "role-embed-remove",
    "role-message-new",
    "role-message-edit",
];

pub struct RoleCommands {
    roles: Arc<RoleRequestSystem>,
    platform: Arc<dyn PlatformConnection>,
}

fn usage(name: &str) -> &'static str {
    match name {
        "role-embed-create" => "usage: `role-embed-create <channel> <emoji> <role> <title>`",
        "role-embed-append" => "usage: `role-embed-append <channel> <message id> <emoji> <role>`",
        "role-embed-remove" => "usage: `role-embed-remove <channel> <message id> <emoji>`",
        "role-message-new" => "usage: `role-message-new <channel> <text>`",
        _ => "usage: `role-message-edit <channel> <message id> <text>`",
    }
}

impl RoleCommands {
    pub fn new(roles: Arc<RoleRequestSystem>, platform: Arc<dyn PlatformConnection>) -> Self {
        Self { roles, platform }
    }

    fn id_arg(ctx: &CommandContext<'_>, index: usize) -> Result<Snowflake> {
        ctx.arg(index)
            .and_then(parse_mention_id)
            .ok_or_else(|| BotError::InvalidArguments(usage(&ctx.name).to_string()).into())
    }

    fn emoji_arg(ctx: &CommandContext<'_>, index: usize) -> Result<EmojiData> {
        ctx.arg(index)
            .and_then(EmojiData::parse)
            .ok_or_else(|| BotError::InvalidArguments(usage(&ctx.name).to_string()).into())
    }

    fn text_after(ctx: &CommandContext<'_>, skip: usize) -> Result<String> {
        let text = ctx.rest_after(skip).trim();
        if text.is_empty() {
            return Err(BotError::InvalidArguments(usage(&ctx.name).to_string()).into());
        }
        Ok(text.to_string())
    }

    async fn run(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let mention = ctx.author_mention();
        let channel_id = Self::id_arg(ctx, 0)?;

        let embed = match ctx.name.as_str() {
            "role-embed-create" => {
                let emoji = Self::emoji_arg(ctx, 1)?;
                let role_id = Self::id_arg(ctx, 2)?;
                let title = Self::text_after(ctx, 3)?;
                let message = self.roles.create(channel_id, &title, &emoji, role_id).await?;
                responses::positive("Create new embed", &mention, "the role message is up!")
                    .field("Link", message_url(ctx.message.guild_id, channel_id, message.id), false)
            }
            "role-embed-append" => {
                let message_id = Self::id_arg(ctx, 1)?;
                let emoji = Self::emoji_arg(ctx, 2)?;
                let role_id = Self::id_arg(ctx, 3)?;
                self.roles.append(channel_id, message_id, &emoji, role_id).await?;
                responses::positive(
                    "Add new roles onto embed",
                    &mention,
                    &format!("{} now grants that role.", emoji),
                )
            }
            "role-embed-remove" => {
                let message_id = Self::id_arg(ctx, 1)?;
                let emoji = Self::emoji_arg(ctx, 2)?;
                let body = match self.roles.remove(channel_id, message_id, &emoji).await? {
                    BindingRemoval::Rebuilt => format!("{} was removed from that message.", emoji),
                    BindingRemoval::MessageDeleted => format!(
                        "{} was removed. The message was deleted as well because that was its only react.",
                        emoji
                    ),
                };
                responses::positive("Remove role from embed", &mention, &body)
            }
            "role-message-new" => {
                let content = Self::text_after(ctx, 1)?;
                self.roles.post_message(channel_id, &content).await?;
                responses::positive(
                    "New message",
                    &mention,
                    &format!("message posted in {}.", channel_mention(channel_id)),
                )
            }
            _ => {
                let message_id = Self::id_arg(ctx, 1)?;
                let content = Self::text_after(ctx, 2)?;
                self.roles.edit_message(channel_id, message_id, &content).await?;
                responses::positive("Edit message", &mention, "the message was updated.")
            }
        };

        ctx.reply(self.platform.as_ref(), embed).await
    }
}

#[async_trait]
impl CommandHandler for RoleCommands {
    async fn process_command(&self, ctx: &CommandContext<'_>) -> Result<bool> {
        if !ROLE_COMMANDS.contains(&ctx.name.as_str()) {
            return Ok(false);
        }
        if ctx.message.guild_id.is_none() {
            return Ok(true);
        }
        if !ctx.require(PrivilegeTier::BotManager)? {
            return Ok(true);
        }

        self.run(ctx).await?;
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

    fn manager() -> UserPermissions {
        UserPermissions {
            highest: PrivilegeTier::BotManager,
            muted: false,
        }
    }

    fn setup(platform: Arc<FakePlatform>, dir: &tempfile::TempDir) -> (RoleCommands, Database) {
        let db = Database::open_in_memory().unwrap();
        let settings = SettingsStore::with_settings(dir.path().join("settings.yaml"), BotSettings::default());
        let roles = Arc::new(RoleRequestSystem::new(db.clone(), platform.clone(), settings));
        (RoleCommands::new(roles, platform), db)
    }

    #[tokio::test]
    async fn test_embed_create_with_multiword_title() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let (commands, db) = setup(platform.clone(), &dir);

        let message = test_message(1, 9, test_user(2), "~role-embed-create <#30> ⭐ <@&70> Notification roles");
        let ctx = CommandContext::parse(&message, "~", manager()).unwrap();
        assert!(commands.process_command(&ctx).await.unwrap());

        let posted = platform.sent_to(30).await;
        assert_eq!(posted[0].content.as_deref(), Some("Notification roles\n⭐ <@&70>"));
        let reply = &platform.sent_to(9).await[0].embeds[0];
        assert_eq!(reply.title.as_deref(), Some("Create new embed"));

        let message_id = platform.state.lock().await.history[&30][0];
        assert_eq!(db.role_bindings_for_message(message_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_requires_bot_manager() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let (commands, _db) = setup(platform.clone(), &dir);

        let message = test_message(1, 9, test_user(2), "~role-message-new <#30> hello");
        let moderator = UserPermissions {
            highest: PrivilegeTier::Moderator,
            muted: false,
        };
        let ctx = CommandContext::parse(&message, "~", moderator).unwrap();
        let err = commands.process_command(&ctx).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BotError>(),
            Some(BotError::InsufficientPermissions { .. })
        ));
        assert!(platform.sent_to(30).await.is_empty());
    }

    #[tokio::test]
    async fn test_bad_emoji_is_invalid_arguments() {
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let (commands, _db) = setup(platform, &dir);

        let message = test_message(1, 9, test_user(2), "~role-embed-create <#30> star <@&70> Title");
        let ctx = CommandContext::parse(&message, "~", manager()).unwrap();
        let err = commands.process_command(&ctx).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<BotError>(), Some(BotError::InvalidArguments(_))));
    }
}
