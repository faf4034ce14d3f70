// src/bot/highlights.rs - Rimboard: repost popular messages to the highlight channel

use anyhow::Result;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

use crate::config::{BotSettings, SettingsStore};
use crate::platforms::PlatformConnection;
use crate::storage::{Database, PinnedEntry};
use crate::types::{ChatMessage, EmojiData, Embed, OutgoingMessage, ReactionEvent, Snowflake};

use super::responses::GOLD_COLOR;

/// Platform limit on pinned messages per channel.
pub const MAX_CHANNEL_PINS: usize = 50;
const MAX_EMBEDS: usize = 10;
const PIN_EMOJI: &str = "📌";

pub struct HighlightBoard {
    db: Database,
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
    /// Held from the pin lookup until the repost is recorded.
    repost_lock: Mutex<()>,
}

impl HighlightBoard {
    pub fn new(db: Database, platform: Arc<dyn PlatformConnection>, settings: SettingsStore) -> Self {
        Self {
            db,
            platform,
            settings,
            repost_lock: Mutex::new(()),
        }
    }

    fn board_active(settings: &BotSettings) -> bool {
        settings.rimboard_enabled && settings.rimboard_webhook_id != 0
    }

    /// Small avatar variant used as the repost thumbnail.
    fn thumbnail_url(avatar: &str) -> String {
        match Url::parse(avatar) {
            Ok(mut url) => {
                url.set_query(Some("size=64"));
                url.to_string()
            }
            Err(_) => avatar.to_string(),
        }
    }

    pub fn build_repost(message: &ChatMessage) -> OutgoingMessage {
        let mut embed = Embed::default()
            .color(GOLD_COLOR)
            .description(message.content.clone())
            .field("Colonist", message.author.mention(), true)
            .field("Link", message.url(), true);
        if let Some(avatar) = &message.author.avatar_url {
            embed = embed.thumbnail(Self::thumbnail_url(avatar));
        }
        if let Some(attachment) = message.attachments.first() {
            embed.image_url = Some(attachment.url.clone());
        }

        let mut outgoing = OutgoingMessage::embed(embed);
        outgoing
            .embeds
            .extend(message.embeds.iter().take(MAX_EMBEDS - 1).cloned());
        outgoing
    }

    pub async fn handle_reaction_added(&self, event: &ReactionEvent) -> Result<()> {
        let settings = self.settings.get().await;
        if event.emoji != settings.rimboard_emoticon
            || event.channel_id == settings.rimboard_channel_id
            || !Self::board_active(&settings)
        {
            return Ok(());
        }

        let channel = self.platform.get_channel(event.channel_id).await?;
        if settings.rimboard_excluded_channels.contains(&channel.effective_id()) {
            return Ok(());
        }

        // Reaction counts on cached copies go stale
        let message = self.platform.get_message(event.channel_id, event.message_id).await?;
        if message.author.is_bot {
            return Ok(());
        }

        let count = message.reaction_count(&settings.rimboard_emoticon);
        if count < settings.rimboard_reactions_needed {
            return Ok(());
        }

        let _guard = self.repost_lock.lock().await;
        match self.db.pin_by_original(message.id)? {
            None => self.repost(&message, settings.rimboard_webhook_id).await,
            Some(entry) if count >= settings.rimboard_pin_reactions_needed => self.pin_repost(&entry).await,
            Some(_) => Ok(()),
        }
    }

    async fn repost(&self, message: &ChatMessage, webhook_id: Snowflake) -> Result<()> {
        let posted = self
            .platform
            .execute_webhook(webhook_id, &Self::build_repost(message))
            .await?;

        self.db.insert_pin(&PinnedEntry {
            original_message_id: message.id,
            pinned_message_id: posted.id,
            original_channel_id: message.channel_id,
            pinned_channel_id: posted.channel_id,
        })?;
        info!("Reposted message {} to the highlight board as {}", message.id, posted.id);
        Ok(())
    }

    async fn pin_repost(&self, entry: &PinnedEntry) -> Result<()> {
        let pinned = self.platform.get_pinned_messages(entry.pinned_channel_id).await?;
        if pinned.iter().any(|m| m.id == entry.pinned_message_id) {
            debug!("Repost {} is already pinned", entry.pinned_message_id);
            return Ok(());
        }
        if pinned.len() >= MAX_CHANNEL_PINS {
            if let Some(oldest) = pinned.last() {
                self.platform.unpin_message(entry.pinned_channel_id, oldest.id).await?;
            }
        }

        self.platform
            .pin_message(entry.pinned_channel_id, entry.pinned_message_id)
            .await?;
        self.platform
            .add_reaction(
                entry.pinned_channel_id,
                entry.pinned_message_id,
                &EmojiData::unicode(PIN_EMOJI),
            )
            .await?;
        info!("Pinned highlight {}", entry.pinned_message_id);
        Ok(())
    }

    /// Reactions wiped on an original take its repost down.
    pub async fn handle_reactions_cleared(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        let settings = self.settings.get().await;
        if channel_id == settings.rimboard_channel_id || !Self::board_active(&settings) {
            return Ok(());
        }
        let Some(entry) = self.db.pin_by_original(message_id)? else {
            return Ok(());
        };

        self.db.remove_pin(entry.original_message_id)?;
        if let Err(e) = self
            .platform
            .delete_message(entry.pinned_channel_id, entry.pinned_message_id)
            .await
        {
            warn!("Failed to delete repost {}: {}", entry.pinned_message_id, e);
        }
        info!("Removed highlight of {} after its reactions were cleared", message_id);
        Ok(())
    }

    /// A repost deleted from the board clears the original's reactions.
    pub async fn handle_message_deleted(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        if channel_id != self.settings.get().await.rimboard_channel_id {
            return Ok(());
        }
        let Some(entry) = self.db.pin_by_repost(message_id)? else {
            return Ok(());
        };

        self.db.remove_pin(entry.original_message_id)?;
        if let Err(e) = self
            .platform
            .remove_all_reactions(entry.original_channel_id, entry.original_message_id)
            .await
        {
            warn!("Failed to clear reactions of {}: {}", entry.original_message_id, e);
        }
        info!("Highlight {} deleted, original {} reset", message_id, entry.original_message_id);
        Ok(())
    }
}
