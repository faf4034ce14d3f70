// src/bot/role_requests.rs - Self-assignable roles through message reactions

use anyhow::Result;
use log::{debug, info};
use std::sync::Arc;

use crate::config::SettingsStore;
use crate::platforms::PlatformConnection;
use crate::storage::{Database, RoleBinding};
use crate::types::{role_mention, BotError, ChatMessage, EmojiData, OutgoingMessage, ReactionEvent, Snowflake};

use super::permissions::{PermissionCheck, PrivilegeTier, UserPermissions};

/// Result of removing one emoji from a role message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRemoval {
    Rebuilt,
    /// The last binding went away together with its message.
    MessageDeleted,
}

pub struct RoleRequestSystem {
    db: Database,
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
}

fn binding_line(emoji: &EmojiData, role_id: Snowflake) -> String {
    format!("{} {}", emoji, role_mention(role_id))
}

impl RoleRequestSystem {
    pub fn new(db: Database, platform: Arc<dyn PlatformConnection>, settings: SettingsStore) -> Self {
        Self { db, platform, settings }
    }

    pub async fn create(
        &self,
        channel_id: Snowflake,
        title: &str,
        emoji: &EmojiData,
        role_id: Snowflake,
    ) -> Result<ChatMessage> {
        if title.trim().is_empty() {
            return Err(BotError::InvalidArguments("the role message needs a title".to_string()).into());
        }

        let content = format!("{}\n{}", title.trim(), binding_line(emoji, role_id));
        let message = self
            .platform
            .send_message(channel_id, &OutgoingMessage::text(content))
            .await?;
        self.platform.add_reaction(channel_id, message.id, emoji).await?;
        self.db.insert_role_binding(&RoleBinding::new(message.id, role_id, emoji))?;

        info!("Created role message {} in channel {}", message.id, channel_id);
        Ok(message)
    }

    pub async fn append(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &EmojiData,
        role_id: Snowflake,
    ) -> Result<()> {
        if self.db.role_binding(message_id, emoji)?.is_some() {
            return Err(BotError::validation(
                "Unable to add role",
                format!("that message already has emote {} on it...", emoji),
            )
            .into());
        }

        let message = self.platform.get_message(channel_id, message_id).await?;
        let content = format!("{}\n{}", message.content, binding_line(emoji, role_id));
        self.platform
            .edit_message(channel_id, message_id, &OutgoingMessage::text(content))
            .await?;
        self.platform.add_reaction(channel_id, message_id, emoji).await?;
        self.db.insert_role_binding(&RoleBinding::new(message_id, role_id, emoji))?;

        info!("Bound role {} to {} on message {}", role_id, emoji, message_id);
        Ok(())
    }

    pub async fn remove(&self, channel_id: Snowflake, message_id: Snowflake, emoji: &EmojiData) -> Result<BindingRemoval> {
        let bindings = self.db.role_bindings_for_message(message_id)?;
        if !bindings.iter().any(|b| b.matches(emoji)) {
            return Err(BotError::not_found(
                "Unable to remove role",
                format!("that message doesn't have emote {} on it...", emoji),
            )
            .into());
        }

        self.db.remove_role_binding(message_id, emoji)?;

        if bindings.len() == 1 {
            self.platform.delete_message(channel_id, message_id).await?;
            info!("Deleted role message {} with its last binding", message_id);
            return Ok(BindingRemoval::MessageDeleted);
        }

        let message = self.platform.get_message(channel_id, message_id).await?;
        let content = Self::without_binding_line(&message.content, emoji);
        self.platform
            .edit_message(channel_id, message_id, &OutgoingMessage::text(content))
            .await?;
        self.platform
            .remove_emoji_reactions(channel_id, message_id, emoji)
            .await?;

        info!("Removed {} from role message {}", emoji, message_id);
        Ok(BindingRemoval::Rebuilt)
    }

    /// Title line plus every binding line whose leading emoji is not `emoji`.
    fn without_binding_line(content: &str, emoji: &EmojiData) -> String {
        let mut lines = content.lines();
        let title = lines.next().unwrap_or_default();
        let kept: Vec<&str> = lines
            .filter(|line| {
                let first = line.split_whitespace().next().unwrap_or_default();
                EmojiData::parse(first).as_ref() != Some(emoji)
            })
            .collect();

        std::iter::once(title).chain(kept).collect::<Vec<_>>().join("\n")
    }

    pub async fn post_message(&self, channel_id: Snowflake, content: &str) -> Result<ChatMessage> {
        self.platform
            .send_message(channel_id, &OutgoingMessage::text(content))
            .await
    }

    pub async fn edit_message(&self, channel_id: Snowflake, message_id: Snowflake, content: &str) -> Result<()> {
        if self.platform.get_message(channel_id, message_id).await.is_err() {
            return Err(BotError::not_found("Unable to edit message", "I could not find that message...").into());
        }
        self.platform
            .edit_message(channel_id, message_id, &OutgoingMessage::text(content))
            .await
    }

    /// Grant (`grant = true`) or revoke the bound role for the reacting member.
    pub async fn handle_reaction(&self, event: &ReactionEvent, grant: bool) -> Result<()> {
        let Some(guild_id) = event.guild_id else {
            return Ok(());
        };
        let Some(binding) = self.db.role_binding(event.message_id, &event.emoji)? else {
            return Ok(());
        };

        let member = match &event.member {
            Some(member) => Some(member.clone()),
            None => self.platform.get_member(guild_id, event.user_id).await?,
        };
        let Some(member) = member else {
            return Ok(());
        };
        if member.user.is_bot {
            return Ok(());
        }

        let role_map = self.settings.get().await.role_map;
        let permissions = UserPermissions::from_roles(&member.roles, &role_map);
        if permissions.check(PrivilegeTier::Colonist) != PermissionCheck::Allowed {
            debug!("Ignoring role reaction from {}", event.user_id);
            return Ok(());
        }

        if grant {
            self.platform.add_role(guild_id, event.user_id, binding.role_id).await?;
            info!("Granted role {} to {}", binding.role_id, event.user_id);
        } else {
            self.platform.remove_role(guild_id, event.user_id, binding.role_id).await?;
            info!("Revoked role {} from {}", binding.role_id, event.user_id);
        }
        Ok(())
    }
}
