// Recording in-memory platform used by system tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{broadcast, Mutex};

use crate::platforms::PlatformConnection;
use crate::types::{
    ChannelInfo, ChatEvent, ChatMessage, ChatUser, EmojiData, GuildMember, MessageKind, OutgoingMessage,
    ReactionCount, Snowflake,
};

pub const TEST_GUILD: Snowflake = 100;
pub const BOT_USER: Snowflake = 555_555_555_555_555_555;

#[derive(Default)]
pub struct FakeState {
    pub next_id: Snowflake,
    pub sent: Vec<(Snowflake, OutgoingMessage)>,
    pub edited: Vec<(Snowflake, Snowflake, OutgoingMessage)>,
    pub deleted: Vec<(Snowflake, Snowflake)>,
    pub messages: HashMap<Snowflake, ChatMessage>,
    /// Newest first per channel.
    pub history: HashMap<Snowflake, Vec<Snowflake>>,
    pub channels: HashMap<Snowflake, ChannelInfo>,
    pub members: HashMap<(Snowflake, Snowflake), GuildMember>,
    pub role_grants: Vec<(Snowflake, Snowflake, Snowflake)>,
    pub role_revokes: Vec<(Snowflake, Snowflake, Snowflake)>,
    pub voice_disconnects: Vec<(Snowflake, Snowflake)>,
    pub reactions_added: Vec<(Snowflake, Snowflake, EmojiData)>,
    pub reactions_cleared: Vec<(Snowflake, Snowflake)>,
    pub emoji_reactions_cleared: Vec<(Snowflake, Snowflake, EmojiData)>,
    /// Newest pin first per channel.
    pub pins: HashMap<Snowflake, Vec<Snowflake>>,
    pub unpinned: Vec<(Snowflake, Snowflake)>,
    pub webhook_posts: Vec<(Snowflake, OutgoingMessage)>,
    pub webhook_channel: Snowflake,
    pub activity: Option<String>,
    pub history_requests: usize,
}

pub struct FakePlatform {
    pub state: Mutex<FakeState>,
    sender: broadcast::Sender<ChatEvent>,
}

impl FakePlatform {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(FakeState {
                next_id: 900_000_000_000_000_000,
                webhook_channel: 777,
                ..Default::default()
            }),
            sender,
        }
    }

    pub fn emit(&self, event: ChatEvent) {
        let _ = self.sender.send(event);
    }

    /// Store a message and append it as the newest entry of its channel history.
    pub async fn add_message(&self, message: ChatMessage) {
        let mut state = self.state.lock().await;
        state.history.entry(message.channel_id).or_default().insert(0, message.id);
        state.messages.insert(message.id, message);
    }

    pub async fn add_member(&self, member: GuildMember) {
        let mut state = self.state.lock().await;
        state.members.insert((member.guild_id, member.user.id), member);
    }

    pub async fn add_channel(&self, channel: ChannelInfo) {
        self.state.lock().await.channels.insert(channel.id, channel);
    }

    pub async fn sent_to(&self, channel_id: Snowflake) -> Vec<OutgoingMessage> {
        self.state
            .lock()
            .await
            .sent
            .iter()
            .filter(|(c, _)| *c == channel_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub async fn set_reactions(&self, message_id: Snowflake, emoji: EmojiData, count: u32) {
        let mut state = self.state.lock().await;
        if let Some(message) = state.messages.get_mut(&message_id) {
            message.reactions.retain(|r| r.emoji != emoji);
            message.reactions.push(ReactionCount { emoji, count, me: false });
        }
    }

    fn bot_message(id: Snowflake, channel_id: Snowflake, outgoing: &OutgoingMessage) -> ChatMessage {
        let mut message = test_message(id, channel_id, test_bot(BOT_USER), outgoing.content.as_deref().unwrap_or(""));
        message.embeds = outgoing.embeds.clone();
        message
    }
}

pub fn test_user(id: Snowflake) -> ChatUser {
    ChatUser {
        id,
        username: format!("user{}", id % 10_000),
        discriminator: None,
        global_name: None,
        avatar_url: Some(format!("https://cdn.example/avatars/{}.png", id)),
        is_bot: false,
    }
}

pub fn test_bot(id: Snowflake) -> ChatUser {
    ChatUser {
        is_bot: true,
        ..test_user(id)
    }
}

pub fn test_member(user: ChatUser, roles: Vec<Snowflake>) -> GuildMember {
    GuildMember {
        guild_id: TEST_GUILD,
        user,
        nick: None,
        roles,
        joined_at: Some(Utc::now()),
    }
}

pub fn test_message(id: Snowflake, channel_id: Snowflake, author: ChatUser, content: &str) -> ChatMessage {
    ChatMessage {
        id,
        channel_id,
        guild_id: Some(TEST_GUILD),
        author,
        member: None,
        content: content.to_string(),
        kind: MessageKind::Default,
        timestamp: Utc::now(),
        mentions: Vec::new(),
        reactions: Vec::new(),
        attachments: Vec::new(),
        embeds: Vec::new(),
        webhook_id: None,
    }
}

#[async_trait]
impl PlatformConnection for FakePlatform {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "fake"
    }

    async fn is_connected(&self) -> bool {
        true
    }

    fn get_event_receiver(&self) -> Option<broadcast::Receiver<ChatEvent>> {
        Some(self.sender.subscribe())
    }

    async fn current_user_id(&self) -> Option<Snowflake> {
        Some(BOT_USER)
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn set_activity(&self, text: &str) -> Result<()> {
        self.state.lock().await.activity = Some(text.to_string());
        Ok(())
    }

    async fn send_message(&self, channel_id: Snowflake, message: &OutgoingMessage) -> Result<ChatMessage> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let created = Self::bot_message(state.next_id, channel_id, message);
        state.sent.push((channel_id, message.clone()));
        state.history.entry(channel_id).or_default().insert(0, created.id);
        state.messages.insert(created.id, created.clone());
        Ok(created)
    }

    async fn edit_message(&self, channel_id: Snowflake, message_id: Snowflake, message: &OutgoingMessage) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.messages.get_mut(&message_id) {
            if let Some(content) = &message.content {
                existing.content = content.clone();
            }
        }
        state.edited.push((channel_id, message_id, message.clone()));
        Ok(())
    }

    async fn delete_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        let mut state = self.state.lock().await;
        state.messages.remove(&message_id);
        state.deleted.push((channel_id, message_id));
        Ok(())
    }

    async fn get_message(&self, _channel_id: Snowflake, message_id: Snowflake) -> Result<ChatMessage> {
        self.state
            .lock()
            .await
            .messages
            .get(&message_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown message {}", message_id))
    }

    async fn get_messages_before(&self, channel_id: Snowflake, before: Option<Snowflake>, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut state = self.state.lock().await;
        state.history_requests += 1;
        let ids = state.history.get(&channel_id).cloned().unwrap_or_default();
        let page = ids
            .iter()
            .filter(|id| before.map(|b| **id < b).unwrap_or(true))
            .filter_map(|id| state.messages.get(id).cloned())
            .take(limit)
            .collect();
        Ok(page)
    }

    async fn get_channel(&self, channel_id: Snowflake) -> Result<ChannelInfo> {
        Ok(self
            .state
            .lock()
            .await
            .channels
            .get(&channel_id)
            .cloned()
            .unwrap_or(ChannelInfo {
                id: channel_id,
                guild_id: Some(TEST_GUILD),
                parent_id: None,
                is_thread: false,
            }))
    }

    async fn get_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<Option<GuildMember>> {
        Ok(self.state.lock().await.members.get(&(guild_id, user_id)).cloned())
    }

    async fn add_role(&self, guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake) -> Result<()> {
        let mut state = self.state.lock().await;
        state.role_grants.push((guild_id, user_id, role_id));
        if let Some(member) = state.members.get_mut(&(guild_id, user_id)) {
            if !member.roles.contains(&role_id) {
                member.roles.push(role_id);
            }
        }
        Ok(())
    }

    async fn remove_role(&self, guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake) -> Result<()> {
        let mut state = self.state.lock().await;
        let member = state
            .members
            .get_mut(&(guild_id, user_id))
            .ok_or_else(|| anyhow!("unknown member {}", user_id))?;
        member.roles.retain(|r| *r != role_id);
        state.role_revokes.push((guild_id, user_id, role_id));
        Ok(())
    }

    async fn disconnect_voice(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<()> {
        self.state.lock().await.voice_disconnects.push((guild_id, user_id));
        Ok(())
    }

    async fn add_reaction(&self, channel_id: Snowflake, message_id: Snowflake, emoji: &EmojiData) -> Result<()> {
        self.state
            .lock()
            .await
            .reactions_added
            .push((channel_id, message_id, emoji.clone()));
        Ok(())
    }

    async fn remove_all_reactions(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.messages.get_mut(&message_id) {
            message.reactions.clear();
        }
        state.reactions_cleared.push((channel_id, message_id));
        Ok(())
    }

    async fn remove_emoji_reactions(&self, channel_id: Snowflake, message_id: Snowflake, emoji: &EmojiData) -> Result<()> {
        self.state
            .lock()
            .await
            .emoji_reactions_cleared
            .push((channel_id, message_id, emoji.clone()));
        Ok(())
    }

    async fn pin_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        self.state.lock().await.pins.entry(channel_id).or_default().insert(0, message_id);
        Ok(())
    }

    async fn unpin_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(pins) = state.pins.get_mut(&channel_id) {
            pins.retain(|id| *id != message_id);
        }
        state.unpinned.push((channel_id, message_id));
        Ok(())
    }

    async fn get_pinned_messages(&self, channel_id: Snowflake) -> Result<Vec<ChatMessage>> {
        let state = self.state.lock().await;
        Ok(state
            .pins
            .get(&channel_id)
            .map(|ids| {
                ids.iter()
                    .map(|id| {
                        state
                            .messages
                            .get(id)
                            .cloned()
                            .unwrap_or_else(|| test_message(*id, channel_id, test_bot(BOT_USER), ""))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn execute_webhook(&self, webhook_id: Snowflake, message: &OutgoingMessage) -> Result<ChatMessage> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let channel = state.webhook_channel;
        let mut created = Self::bot_message(state.next_id, channel, message);
        created.webhook_id = Some(webhook_id);
        state.webhook_posts.push((webhook_id, message.clone()));
        state.history.entry(channel).or_default().insert(0, created.id);
        state.messages.insert(created.id, created.clone());
        Ok(created)
    }
}
