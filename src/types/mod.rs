// src/types/mod.rs - Platform-neutral chat model shared by every bot system

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 64-bit platform identifier for users, messages, channels, guilds and roles.
pub type Snowflake = u64;

/// Epoch of platform snowflakes, in unix milliseconds.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_420_070_400_000;

/// Creation time encoded in the upper bits of a snowflake.
pub fn snowflake_timestamp(id: Snowflake) -> DateTime<Utc> {
    let millis = (id >> 22) as i64 + SNOWFLAKE_EPOCH_MS;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

/// `<@id>` mention string.
pub fn user_mention(id: Snowflake) -> String {
    format!("<@{}>", id)
}

pub fn channel_mention(id: Snowflake) -> String {
    format!("<#{}>", id)
}

pub fn role_mention(id: Snowflake) -> String {
    format!("<@&{}>", id)
}

/// Jump link to a message.
pub fn message_url(guild_id: Option<Snowflake>, channel_id: Snowflake, message_id: Snowflake) -> String {
    match guild_id {
        Some(guild) => format!("https://discord.com/channels/{}/{}/{}", guild, channel_id, message_id),
        None => format!("https://discord.com/channels/@me/{}/{}", channel_id, message_id),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: Option<String>,
    pub global_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_bot: bool,
}

impl ChatUser {
    pub fn mention(&self) -> String {
        user_mention(self.id)
    }

    /// `name#1234` for legacy accounts, plain username otherwise.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if d != "0" && !d.is_empty() => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        snowflake_timestamp(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildMember {
    pub guild_id: Snowflake,
    pub user: ChatUser,
    pub nick: Option<String>,
    pub roles: Vec<Snowflake>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl GuildMember {
    /// Guild nickname, then global display name, then username.
    pub fn display_name(&self) -> &str {
        self.nick
            .as_deref()
            .or(self.user.global_name.as_deref())
            .unwrap_or(&self.user.username)
    }

    pub fn has_role(&self, role_id: Snowflake) -> bool {
        self.roles.contains(&role_id)
    }
}

/// Message kinds the bot distinguishes between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Default,
    Reply,
    Other(u8),
}

impl MessageKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => MessageKind::Default,
            19 => MessageKind::Reply,
            other => MessageKind::Other(other),
        }
    }

    /// Only user-authored kinds are subject to filtering and admission.
    pub fn is_user_content(&self) -> bool {
        matches!(self, MessageKind::Default | MessageKind::Reply)
    }
}

/// Unicode emoji or a guild custom emoji.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmojiData {
    Unicode { name: String },
    Custom { id: Snowflake, name: String, animated: bool },
}

impl EmojiData {
    pub fn unicode(name: &str) -> Self {
        EmojiData::Unicode { name: name.to_string() }
    }

    pub fn is_unicode(&self) -> bool {
        matches!(self, EmojiData::Unicode { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            EmojiData::Unicode { name } | EmojiData::Custom { name, .. } => name,
        }
    }

    /// Value persisted next to the unicode flag: the glyph or the custom id.
    pub fn storage_value(&self) -> String {
        match self {
            EmojiData::Unicode { name } => name.clone(),
            EmojiData::Custom { id, .. } => id.to_string(),
        }
    }

    /// Form expected by the reactions endpoints (`name:id` for custom emoji).
    pub fn api_form(&self) -> String {
        match self {
            EmojiData::Unicode { name } => name.clone(),
            EmojiData::Custom { id, name, .. } => format!("{}:{}", name, id),
        }
    }

    /// Parse `<:name:id>`, `<a:name:id>` or a bare unicode glyph.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        if let Some(inner) = input.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            let mut parts = inner.split(':');
            let animated = match parts.next()? {
                "" => false,
                "a" => true,
                _ => return None,
            };
            let name = parts.next()?.to_string();
            let id = parts.next()?.parse().ok()?;
            return Some(EmojiData::Custom { id, name, animated });
        }

        if input.chars().any(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(EmojiData::unicode(input))
    }
}

impl PartialEq for EmojiData {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EmojiData::Unicode { name: a }, EmojiData::Unicode { name: b }) => a == b,
            (EmojiData::Custom { id: a, .. }, EmojiData::Custom { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for EmojiData {}

impl fmt::Display for EmojiData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmojiData::Unicode { name } => write!(f, "{}", name),
            EmojiData::Custom { id, name, animated } => {
                write!(f, "<{}:{}:{}>", if *animated { "a" } else { "" }, name, id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionCount {
    pub emoji: EmojiData,
    pub count: u32,
    pub me: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub author: ChatUser,
    /// Partial member attached to guild messages.
    pub member: Option<GuildMember>,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub mentions: Vec<ChatUser>,
    pub reactions: Vec<ReactionCount>,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub webhook_id: Option<Snowflake>,
}

impl ChatMessage {
    pub fn is_private(&self) -> bool {
        self.guild_id.is_none()
    }

    pub fn url(&self) -> String {
        message_url(self.guild_id, self.channel_id, self.id)
    }

    pub fn reaction_count(&self, emoji: &EmojiData) -> u32 {
        self.reactions
            .iter()
            .find(|r| &r.emoji == emoji)
            .map(|r| r.count)
            .unwrap_or(0)
    }

    /// True when the resolved mention list or the raw content mentions `user_id`.
    pub fn mentions_user(&self, user_id: Snowflake) -> bool {
        if self.mentions.iter().any(|u| u.id == user_id) {
            return true;
        }
        // Mentioned users that left the guild may not be resolved
        self.content.contains(&format!("<@!{}>", user_id)) || self.content.contains(&format!("<@{}>", user_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub parent_id: Option<Snowflake>,
    pub is_thread: bool,
}

impl ChannelInfo {
    /// Channel id that settings lists refer to: a thread resolves to its parent.
    pub fn effective_id(&self) -> Snowflake {
        if self.is_thread {
            self.parent_id.unwrap_or(self.id)
        } else {
            self.id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub user_id: Snowflake,
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub emoji: EmojiData,
    pub member: Option<GuildMember>,
}

/// Every inbound event the bot reacts to.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Ready { user: ChatUser },
    MessageCreated(ChatMessage),
    MessageUpdated { before: Option<ChatMessage>, after: ChatMessage },
    MessageDeleted { channel_id: Snowflake, message_id: Snowflake, guild_id: Option<Snowflake> },
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    ReactionsCleared { channel_id: Snowflake, message_id: Snowflake, guild_id: Option<Snowflake> },
    MemberAdded(GuildMember),
    MemberRemoved { guild_id: Snowflake, user: ChatUser },
    MemberUpdated { roles_before: Option<Vec<Snowflake>>, member: GuildMember },
    Heartbeat,
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::Ready { .. } => "ready",
            ChatEvent::MessageCreated(_) => "message_created",
            ChatEvent::MessageUpdated { .. } => "message_updated",
            ChatEvent::MessageDeleted { .. } => "message_deleted",
            ChatEvent::ReactionAdded(_) => "reaction_added",
            ChatEvent::ReactionRemoved(_) => "reaction_removed",
            ChatEvent::ReactionsCleared { .. } => "reactions_cleared",
            ChatEvent::MemberAdded(_) => "member_added",
            ChatEvent::MemberRemoved { .. } => "member_removed",
            ChatEvent::MemberUpdated { .. } => "member_updated",
            ChatEvent::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

impl Embed {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value.as_str())
    }
}

/// Content and embeds of a message the bot sends or edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embeds: Vec::new(),
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embeds: vec![embed],
        }
    }

    pub fn with_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }
}

/// Failures reported back to the invoking user instead of being logged as faults.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{title}: {body}")]
    Validation { title: String, body: String },

    #[error("{title}: {body}")]
    NotFound { title: String, body: String },

    #[error("requires at least {role}")]
    InsufficientPermissions { role: String },

    #[error("store error: {0}")]
    Store(String),
}

impl BotError {
    pub fn validation(title: impl Into<String>, body: impl Into<String>) -> Self {
        BotError::Validation {
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn not_found(title: impl Into<String>, body: impl Into<String>) -> Self {
        BotError::NotFound {
            title: title.into(),
            body: body.into(),
        }
    }
}
