use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::config::SettingsStore;
use crate::platforms::PlatformConnection;
use crate::types::{BotError, ChatMessage, Embed, OutgoingMessage, Snowflake};

use super::permissions::{PermissionCheck, PrivilegeTier, UserPermissions};
use super::responses;

/// A parsed prefix command together with its invoker.
pub struct CommandContext<'a> {
    /// Lowercased command name without the prefix.
    pub name: String,
    pub args: Vec<&'a str>,
    /// Raw text after the command name.
    body: &'a str,
    pub message: &'a ChatMessage,
    pub permissions: UserPermissions,
}

impl<'a> CommandContext<'a> {
    pub fn parse(message: &'a ChatMessage, prefix: &str, permissions: UserPermissions) -> Option<Self> {
        let without_prefix = message.content.strip_prefix(prefix)?;
        let trimmed = without_prefix.trim_start();
        if trimmed.len() != without_prefix.len() {
            return None;
        }

        let name_end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let name = &trimmed[..name_end];
        if name.is_empty() {
            return None;
        }
        let body = &trimmed[name_end..];

        Some(Self {
            name: name.to_lowercase(),
            args: body.split_whitespace().collect(),
            body,
            message,
            permissions,
        })
    }

    /// Raw remainder after skipping `n` argument tokens, with line breaks kept.
    pub fn rest_after(&self, n: usize) -> &'a str {
        let mut rest = self.body.trim_start();
        for _ in 0..n {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            rest = rest[end..].trim_start();
        }
        rest
    }

    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.args.get(index).copied()
    }

    pub fn author_mention(&self) -> String {
        self.message.author.mention()
    }

    /// `Ok(false)` means the invoker is ignored silently (muted or roleless).
    pub fn require(&self, tier: PrivilegeTier) -> Result<bool> {
        match self.permissions.check(tier) {
            PermissionCheck::Allowed => Ok(true),
            PermissionCheck::SilentReject => {
                debug!("Silently ignoring '{}' from {}", self.name, self.message.author.id);
                Ok(false)
            }
            PermissionCheck::Insufficient => Err(BotError::InsufficientPermissions {
                role: tier.display_name().to_string(),
            }
            .into()),
        }
    }

    pub async fn reply(&self, platform: &dyn PlatformConnection, embed: Embed) -> Result<()> {
        platform
            .send_message(self.message.channel_id, &OutgoingMessage::embed(embed))
            .await?;
        Ok(())
    }
}

/// Extract the id from `<@id>`, `<@!id>`, `<#id>`, `<@&id>` or a bare id.
pub fn parse_mention_id(token: &str) -> Option<Snowflake> {
    let inner = token
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .map(|t| t.trim_start_matches(['@', '#', '!', '&']))
        .unwrap_or(token);
    inner.parse().ok()
}

/// Handlers are tried in registration order until one claims the command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// `Ok(true)` when the command belongs to this handler.
    async fn process_command(&self, ctx: &CommandContext<'_>) -> Result<bool>;
}

pub struct CommandSystem {
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
    handlers: Vec<Arc<dyn CommandHandler>>,
}

impl CommandSystem {
    pub fn new(platform: Arc<dyn PlatformConnection>, settings: SettingsStore) -> Self {
        Self {
            platform,
            settings,
            handlers: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        self.handlers.push(handler);
    }

    /// Returns true when the message was a command some handler claimed.
    pub async fn process_message(&self, message: &ChatMessage) -> Result<bool> {
        if message.author.is_bot {
            return Ok(false);
        }

        let settings = self.settings.get().await;
        if !message.content.starts_with(&settings.command_prefix) {
            return Ok(false);
        }

        let permissions = self.resolve_permissions(message, &settings.role_map).await;
        let Some(ctx) = CommandContext::parse(message, &settings.command_prefix, permissions) else {
            return Ok(false);
        };

        for handler in &self.handlers {
            match handler.process_command(&ctx).await {
                Ok(true) => {
                    info!(
                        "Command '{}' by {} ({}) in channel {}",
                        ctx.name,
                        message.author.tag(),
                        message.author.id,
                        message.channel_id
                    );
                    return Ok(true);
                }
                Ok(false) => continue,
                Err(e) => {
                    self.respond_error(&ctx, e).await;
                    return Ok(true);
                }
            }
        }

        debug!("Unknown command: {}", ctx.name);
        Ok(false)
    }

    async fn resolve_permissions(&self, message: &ChatMessage, role_map: &crate::config::RoleMap) -> UserPermissions {
        if let Some(member) = &message.member {
            return UserPermissions::from_roles(&member.roles, role_map);
        }
        let Some(guild_id) = message.guild_id else {
            return UserPermissions::none();
        };
        match self.platform.get_member(guild_id, message.author.id).await {
            Ok(Some(member)) => UserPermissions::from_roles(&member.roles, role_map),
            Ok(None) => UserPermissions::none(),
            Err(e) => {
                warn!("Failed to resolve roles of {}: {}", message.author.id, e);
                UserPermissions::none()
            }
        }
    }

    async fn respond_error(&self, ctx: &CommandContext<'_>, err: anyhow::Error) {
        let mention = ctx.author_mention();
        let embed = match err.downcast_ref::<BotError>() {
            Some(BotError::InsufficientPermissions { role }) => {
                responses::insufficient_permissions(&mention, role, &ctx.name)
            }
            Some(BotError::Validation { title, body }) | Some(BotError::NotFound { title, body }) => {
                responses::negative(title, &mention, body)
            }
            Some(BotError::InvalidArguments(usage)) => responses::negative("Invalid arguments", &mention, usage),
            Some(BotError::Store(_)) | None => {
                error!("Command '{}' failed: {:#}", ctx.name, err);
                responses::negative(
                    "Something went wrong",
                    &mention,
                    "an internal error occurred while running this command.",
                )
            }
        };

        if let Err(e) = ctx.reply(self.platform.as_ref(), embed).await {
            error!("Failed to send error response for '{}': {}", ctx.name, e);
        }
    }
}
