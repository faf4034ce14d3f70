use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::{ChannelInfo, ChatEvent, ChatMessage, EmojiData, GuildMember, OutgoingMessage, Snowflake};

pub mod discord;

#[cfg(test)]
pub mod testing;

/// Trait defining the gateway and REST surface the bot systems depend on
#[async_trait]
pub trait PlatformConnection: Send + Sync {
    /// Connect to the platform and start receiving events
    async fn connect(&self) -> Result<()>;

    /// Get the platform identifier (e.g., "discord")
    fn platform_name(&self) -> &str;

    /// Check if the connection is healthy
    async fn is_connected(&self) -> bool;

    /// Get a receiver for incoming events
    fn get_event_receiver(&self) -> Option<broadcast::Receiver<ChatEvent>>;

    /// Id of the bot account once the gateway reported ready
    async fn current_user_id(&self) -> Option<Snowflake>;

    /// Gracefully disconnect
    async fn disconnect(&self) -> Result<()>;

    /// Update the "playing" activity shown for the bot
    async fn set_activity(&self, text: &str) -> Result<()>;

    async fn send_message(&self, channel_id: Snowflake, message: &OutgoingMessage) -> Result<ChatMessage>;

    async fn edit_message(&self, channel_id: Snowflake, message_id: Snowflake, message: &OutgoingMessage) -> Result<()>;

    async fn delete_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()>;

    /// Fetch a message bypassing any cache
    async fn get_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<ChatMessage>;

    /// Newest-first history strictly before `before` (or from the latest message when `None`)
    async fn get_messages_before(&self, channel_id: Snowflake, before: Option<Snowflake>, limit: usize) -> Result<Vec<ChatMessage>>;

    async fn get_channel(&self, channel_id: Snowflake) -> Result<ChannelInfo>;

    /// `Ok(None)` when the user is not a member of the guild
    async fn get_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<Option<GuildMember>>;

    async fn add_role(&self, guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake) -> Result<()>;

    async fn remove_role(&self, guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake) -> Result<()>;

    /// Kick the member out of whatever voice channel they are in
    async fn disconnect_voice(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<()>;

    async fn add_reaction(&self, channel_id: Snowflake, message_id: Snowflake, emoji: &EmojiData) -> Result<()>;

    async fn remove_all_reactions(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()>;

    async fn remove_emoji_reactions(&self, channel_id: Snowflake, message_id: Snowflake, emoji: &EmojiData) -> Result<()>;

    async fn pin_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()>;

    async fn unpin_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()>;

    /// Pinned messages, newest pin first
    async fn get_pinned_messages(&self, channel_id: Snowflake) -> Result<Vec<ChatMessage>>;

    /// Post through a channel webhook and return the created message
    async fn execute_webhook(&self, webhook_id: Snowflake, message: &OutgoingMessage) -> Result<ChatMessage>;
}
