use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use moka::sync::Cache;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::platforms::PlatformConnection;
use crate::types::{
    Attachment, ChannelInfo, ChatEvent, ChatMessage, ChatUser, EmbedAuthor, EmbedField, EmojiData, GuildMember,
    MessageKind, OutgoingMessage, ReactionCount, ReactionEvent, Snowflake,
};

type WebSocketWriter = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const API_BASE: &str = "https://discord.com/api/v10";

// GUILDS | GUILD_MEMBERS | GUILD_MESSAGES | GUILD_MESSAGE_REACTIONS | DIRECT_MESSAGES | MESSAGE_CONTENT
const DEFAULT_INTENTS: u64 = 1 | 2 | 512 | 1024 | 4096 | 32768;

const MESSAGE_CACHE_CAPACITY: u64 = 10_000;
const MEMBER_CACHE_CAPACITY: u64 = 50_000;
const HISTORY_PAGE_SIZE: usize = 100;
const MAX_RATE_LIMIT_RETRIES: usize = 3;
const EVENT_CHANNEL_CAPACITY: usize = 1000;

mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const PRESENCE_UPDATE: u8 = 3;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Configuration for the Discord connection
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub token: String,
    pub intents: u64,
}

impl DiscordConfig {
    /// Load Discord configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let token = env::var("DISCORD_TOKEN").context("DISCORD_TOKEN environment variable not set")?;
        let token = token.trim().trim_start_matches("Bot ").to_string();
        if token.is_empty() {
            return Err(anyhow!("DISCORD_TOKEN is empty"));
        }

        let intents = match env::var("DISCORD_INTENTS") {
            Ok(raw) => raw.trim().parse().context("DISCORD_INTENTS must be an integer bitfield")?,
            Err(_) => DEFAULT_INTENTS,
        };

        info!("Loaded Discord config (intents {})", intents);
        Ok(Self { token, intents })
    }
}

// Snowflakes arrive as JSON strings.

fn snowflake<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Snowflake, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn optional_snowflake<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Snowflake>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => raw.parse().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn snowflake_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Snowflake>, D::Error> {
    Vec::<String>::deserialize(deserializer)?
        .iter()
        .map(|raw| raw.parse().map_err(serde::de::Error::custom))
        .collect()
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    #[serde(deserialize_with = "snowflake")]
    id: Snowflake,
    username: String,
    #[serde(default)]
    discriminator: Option<String>,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    bot: bool,
}

impl From<RawUser> for ChatUser {
    fn from(raw: RawUser) -> Self {
        let avatar_url = raw
            .avatar
            .map(|hash| format!("https://cdn.discordapp.com/avatars/{}/{}.png", raw.id, hash));
        ChatUser {
            id: raw.id,
            username: raw.username,
            discriminator: raw.discriminator,
            global_name: raw.global_name,
            avatar_url,
            is_bot: raw.bot,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMember {
    #[serde(default)]
    user: Option<RawUser>,
    #[serde(default, deserialize_with = "optional_snowflake")]
    guild_id: Option<Snowflake>,
    #[serde(default)]
    nick: Option<String>,
    #[serde(default, deserialize_with = "snowflake_list")]
    roles: Vec<Snowflake>,
    #[serde(default)]
    joined_at: Option<DateTime<Utc>>,
}

impl RawMember {
    /// Message and reaction payloads omit the member's user, so callers pass it in.
    fn into_member(self, guild_id: Snowflake, user: Option<ChatUser>) -> Option<GuildMember> {
        let user = self.user.map(ChatUser::from).or(user)?;
        Some(GuildMember {
            guild_id: self.guild_id.unwrap_or(guild_id),
            user,
            nick: self.nick,
            roles: self.roles,
            joined_at: self.joined_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEmoji {
    #[serde(default, deserialize_with = "optional_snowflake")]
    id: Option<Snowflake>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    animated: bool,
}

impl From<RawEmoji> for EmojiData {
    fn from(raw: RawEmoji) -> Self {
        let name = raw.name.unwrap_or_default();
        match raw.id {
            Some(id) => EmojiData::Custom {
                id,
                name,
                animated: raw.animated,
            },
            None => EmojiData::Unicode { name },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawReaction {
    count: u32,
    #[serde(default)]
    me: bool,
    emoji: RawEmoji,
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    url: String,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(deserialize_with = "snowflake")]
    id: Snowflake,
    #[serde(deserialize_with = "snowflake")]
    channel_id: Snowflake,
    #[serde(default, deserialize_with = "optional_snowflake")]
    guild_id: Option<Snowflake>,
    author: RawUser,
    #[serde(default)]
    member: Option<RawMember>,
    #[serde(default)]
    content: String,
    #[serde(rename = "type", default)]
    kind: u8,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    mentions: Vec<RawUser>,
    #[serde(default)]
    reactions: Vec<RawReaction>,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
    #[serde(default)]
    embeds: Vec<WireEmbed>,
    #[serde(default, deserialize_with = "optional_snowflake")]
    webhook_id: Option<Snowflake>,
}

impl From<RawMessage> for ChatMessage {
    fn from(raw: RawMessage) -> Self {
        let author = ChatUser::from(raw.author);
        let member = match (raw.member, raw.guild_id) {
            (Some(member), Some(guild_id)) => member.into_member(guild_id, Some(author.clone())),
            _ => None,
        };

        ChatMessage {
            id: raw.id,
            channel_id: raw.channel_id,
            guild_id: raw.guild_id,
            author,
            member,
            content: raw.content,
            kind: MessageKind::from_code(raw.kind),
            timestamp: raw.timestamp,
            mentions: raw.mentions.into_iter().map(ChatUser::from).collect(),
            reactions: raw
                .reactions
                .into_iter()
                .map(|r| ReactionCount {
                    emoji: r.emoji.into(),
                    count: r.count,
                    me: r.me,
                })
                .collect(),
            attachments: raw
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    url: a.url,
                    filename: a.filename,
                })
                .collect(),
            embeds: raw.embeds.into_iter().map(crate::types::Embed::from).collect(),
            webhook_id: raw.webhook_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    #[serde(deserialize_with = "snowflake")]
    id: Snowflake,
    #[serde(rename = "type", default)]
    kind: u8,
    #[serde(default, deserialize_with = "optional_snowflake")]
    guild_id: Option<Snowflake>,
    #[serde(default, deserialize_with = "optional_snowflake")]
    parent_id: Option<Snowflake>,
}

impl From<RawChannel> for ChannelInfo {
    fn from(raw: RawChannel) -> Self {
        ChannelInfo {
            id: raw.id,
            guild_id: raw.guild_id,
            parent_id: raw.parent_id,
            // announcement, public and private threads
            is_thread: matches!(raw.kind, 10..=12),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawReactionEvent {
    #[serde(deserialize_with = "snowflake")]
    user_id: Snowflake,
    #[serde(deserialize_with = "snowflake")]
    channel_id: Snowflake,
    #[serde(deserialize_with = "snowflake")]
    message_id: Snowflake,
    #[serde(default, deserialize_with = "optional_snowflake")]
    guild_id: Option<Snowflake>,
    emoji: RawEmoji,
    #[serde(default)]
    member: Option<RawMember>,
}

impl From<RawReactionEvent> for ReactionEvent {
    fn from(raw: RawReactionEvent) -> Self {
        let member = match (raw.member, raw.guild_id) {
            (Some(member), Some(guild_id)) => member.into_member(guild_id, None),
            _ => None,
        };
        ReactionEvent {
            user_id: raw.user_id,
            channel_id: raw.channel_id,
            message_id: raw.message_id,
            guild_id: raw.guild_id,
            emoji: raw.emoji.into(),
            member,
        }
    }
}

/// Message id plus location, as sent by delete and clear-reactions dispatches.
#[derive(Debug, Deserialize)]
struct RawMessageRef {
    #[serde(default, deserialize_with = "optional_snowflake")]
    id: Option<Snowflake>,
    #[serde(default, deserialize_with = "optional_snowflake")]
    message_id: Option<Snowflake>,
    #[serde(deserialize_with = "snowflake")]
    channel_id: Snowflake,
    #[serde(default, deserialize_with = "optional_snowflake")]
    guild_id: Option<Snowflake>,
}

#[derive(Debug, Deserialize)]
struct RawMemberRemoval {
    #[serde(deserialize_with = "snowflake")]
    guild_id: Snowflake,
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawGuild {
    #[serde(deserialize_with = "snowflake")]
    id: Snowflake,
    #[serde(default)]
    members: Vec<RawMember>,
}

#[derive(Debug, Deserialize)]
struct RawReady {
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawHello {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct RawWebhook {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimited {
    #[serde(default)]
    retry_after: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireMedia {
    url: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireFooter {
    text: String,
}

/// Embed in the nested shape the REST API reads and writes.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireEmbed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<EmbedAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thumbnail: Option<WireMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<WireMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    footer: Option<WireFooter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField>,
}

impl From<&crate::types::Embed> for WireEmbed {
    fn from(embed: &crate::types::Embed) -> Self {
        WireEmbed {
            title: embed.title.clone(),
            description: embed.description.clone(),
            color: embed.color,
            author: embed.author.clone(),
            thumbnail: embed.thumbnail_url.clone().map(|url| WireMedia { url }),
            image: embed.image_url.clone().map(|url| WireMedia { url }),
            footer: embed.footer.clone().map(|text| WireFooter { text }),
            fields: embed.fields.clone(),
        }
    }
}

impl From<WireEmbed> for crate::types::Embed {
    fn from(wire: WireEmbed) -> Self {
        crate::types::Embed {
            title: wire.title,
            description: wire.description,
            color: wire.color,
            author: wire.author,
            thumbnail_url: wire.thumbnail.map(|m| m.url),
            image_url: wire.image.map(|m| m.url),
            footer: wire.footer.map(|f| f.text),
            fields: wire.fields,
        }
    }
}

fn message_body(message: &OutgoingMessage) -> Value {
    let mut body = Map::new();
    if let Some(content) = &message.content {
        body.insert("content".to_string(), Value::String(content.clone()));
    }
    let embeds: Vec<WireEmbed> = message.embeds.iter().map(WireEmbed::from).collect();
    body.insert("embeds".to_string(), json!(embeds));
    body.insert("allowed_mentions".to_string(), json!({ "parse": ["users", "roles"] }));
    Value::Object(body)
}

/// Gateway session state shared between the reader, the heartbeat and the REST side.
struct GatewayState {
    config: DiscordConfig,
    events: broadcast::Sender<ChatEvent>,
    writer: Mutex<Option<WebSocketWriter>>,
    connected: RwLock<bool>,
    sequence: RwLock<Option<u64>>,
    user_id: RwLock<Option<Snowflake>>,
    messages: Cache<Snowflake, ChatMessage>,
    member_roles: Cache<(Snowflake, Snowflake), Vec<Snowflake>>,
}

impl GatewayState {
    fn new(config: DiscordConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            events,
            writer: Mutex::new(None),
            connected: RwLock::new(false),
            sequence: RwLock::new(None),
            user_id: RwLock::new(None),
            messages: Cache::new(MESSAGE_CACHE_CAPACITY),
            member_roles: Cache::new(MEMBER_CACHE_CAPACITY),
        }
    }

    async fn send(&self, op: u8, data: Value) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| anyhow!("Not connected to the Discord gateway"))?;
        writer
            .send(Message::Text(json!({ "op": op, "d": data }).to_string()))
            .await
            .with_context(|| format!("Failed to send gateway opcode {}", op))
    }

    fn emit(&self, event: ChatEvent) {
        if let Err(e) = self.events.send(event) {
            debug!("No subscribers for {}", e.0.name());
        }
    }

    async fn identify(&self) -> Result<()> {
        self.send(
            opcode::IDENTIFY,
            json!({
                "token": self.config.token,
                "intents": self.config.intents,
                "properties": { "os": env::consts::OS, "browser": "stellarch", "device": "stellarch" },
            }),
        )
        .await
    }

    fn start_heartbeat(self: &Arc<Self>, interval: Duration) {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            info!("Gateway heartbeat every {:?}", interval);
            loop {
                tokio::time::sleep(interval).await;
                if !*state.connected.read().await {
                    break;
                }
                let sequence = *state.sequence.read().await;
                if let Err(e) = state.send(opcode::HEARTBEAT, json!(sequence)).await {
                    error!("Failed to send heartbeat: {}", e);
                    break;
                }
                state.emit(ChatEvent::Heartbeat);
            }
            debug!("Heartbeat task exited");
        });
    }

    /// Returns false when the session must be dropped.
    async fn handle_payload(self: &Arc<Self>, text: &str) -> Result<bool> {
        let payload: GatewayPayload = serde_json::from_str(text).context("Malformed gateway payload")?;
        if let Some(sequence) = payload.s {
            *self.sequence.write().await = Some(sequence);
        }

        match payload.op {
            opcode::HELLO => {
                let hello: RawHello = serde_json::from_value(payload.d)?;
                self.start_heartbeat(Duration::from_millis(hello.heartbeat_interval));
                self.identify().await?;
            }
            opcode::DISPATCH => {
                let kind = payload.t.unwrap_or_default();
                match self.translate(&kind, payload.d).await {
                    Ok(Some(event)) => self.emit(event),
                    Ok(None) => {}
                    Err(e) => warn!("Failed to translate {} dispatch: {:#}", kind, e),
                }
            }
            opcode::HEARTBEAT => {
                let sequence = *self.sequence.read().await;
                self.send(opcode::HEARTBEAT, json!(sequence)).await?;
            }
            opcode::HEARTBEAT_ACK => debug!("Heartbeat acknowledged"),
            opcode::RECONNECT => {
                warn!("Gateway requested a reconnect");
                return Ok(false);
            }
            opcode::INVALID_SESSION => {
                error!("Gateway invalidated the session");
                return Ok(false);
            }
            other => debug!("Ignoring gateway opcode {}", other),
        }
        Ok(true)
    }

    async fn translate(&self, kind: &str, data: Value) -> Result<Option<ChatEvent>> {
        let event = match kind {
            "READY" => {
                let ready: RawReady = serde_json::from_value(data)?;
                let user = ChatUser::from(ready.user);
                *self.user_id.write().await = Some(user.id);
                Some(ChatEvent::Ready { user })
            }
            "GUILD_CREATE" => {
                let guild: RawGuild = serde_json::from_value(data)?;
                for raw in guild.members {
                    if let Some(member) = raw.into_member(guild.id, None) {
                        self.member_roles.insert((guild.id, member.user.id), member.roles);
                    }
                }
                debug!("Cached member roles for guild {}", guild.id);
                None
            }
            "MESSAGE_CREATE" => {
                let message = ChatMessage::from(serde_json::from_value::<RawMessage>(data)?);
                self.messages.insert(message.id, message.clone());
                Some(ChatEvent::MessageCreated(message))
            }
            "MESSAGE_UPDATE" => {
                // Embed unfurls arrive as partial updates without an author
                let Ok(raw) = serde_json::from_value::<RawMessage>(data) else {
                    debug!("Skipping partial message update");
                    return Ok(None);
                };
                let after = ChatMessage::from(raw);
                let before = self.messages.get(&after.id);
                self.messages.insert(after.id, after.clone());
                Some(ChatEvent::MessageUpdated { before, after })
            }
            "MESSAGE_DELETE" => {
                let raw: RawMessageRef = serde_json::from_value(data)?;
                let message_id = raw.id.ok_or_else(|| anyhow!("message delete without id"))?;
                self.messages.invalidate(&message_id);
                Some(ChatEvent::MessageDeleted {
                    channel_id: raw.channel_id,
                    message_id,
                    guild_id: raw.guild_id,
                })
            }
            "MESSAGE_REACTION_ADD" => {
                let raw: RawReactionEvent = serde_json::from_value(data)?;
                Some(ChatEvent::ReactionAdded(raw.into()))
            }
            "MESSAGE_REACTION_REMOVE" => {
                let raw: RawReactionEvent = serde_json::from_value(data)?;
                Some(ChatEvent::ReactionRemoved(raw.into()))
            }
            "MESSAGE_REACTION_REMOVE_ALL" => {
                let raw: RawMessageRef = serde_json::from_value(data)?;
                let message_id = raw.message_id.ok_or_else(|| anyhow!("reaction clear without message id"))?;
                Some(ChatEvent::ReactionsCleared {
                    channel_id: raw.channel_id,
                    message_id,
                    guild_id: raw.guild_id,
                })
            }
            "GUILD_MEMBER_ADD" => {
                let raw: RawMember = serde_json::from_value(data)?;
                let guild_id = raw.guild_id.ok_or_else(|| anyhow!("member add without guild"))?;
                let member = raw
                    .into_member(guild_id, None)
                    .ok_or_else(|| anyhow!("member add without user"))?;
                self.member_roles.insert((guild_id, member.user.id), member.roles.clone());
                Some(ChatEvent::MemberAdded(member))
            }
            "GUILD_MEMBER_REMOVE" => {
                let raw: RawMemberRemoval = serde_json::from_value(data)?;
                let user = ChatUser::from(raw.user);
                self.member_roles.invalidate(&(raw.guild_id, user.id));
                Some(ChatEvent::MemberRemoved {
                    guild_id: raw.guild_id,
                    user,
                })
            }
            "GUILD_MEMBER_UPDATE" => {
                let raw: RawMember = serde_json::from_value(data)?;
                let guild_id = raw.guild_id.ok_or_else(|| anyhow!("member update without guild"))?;
                let member = raw
                    .into_member(guild_id, None)
                    .ok_or_else(|| anyhow!("member update without user"))?;
                let key = (guild_id, member.user.id);
                let roles_before = self.member_roles.get(&key);
                self.member_roles.insert(key, member.roles.clone());
                Some(ChatEvent::MemberUpdated { roles_before, member })
            }
            other => {
                debug!("Ignoring dispatch {}", other);
                None
            }
        };
        Ok(event)
    }
}

/// Discord gateway + REST connection implementation
pub struct DiscordConnection {
    state: Arc<GatewayState>,
    http: reqwest::Client,
    webhook_tokens: RwLock<HashMap<Snowflake, String>>,
}

impl DiscordConnection {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            state: Arc::new(GatewayState::new(config)),
            http: reqwest::Client::new(),
            webhook_tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Send a REST request, waiting out rate limits a few times before giving up.
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let url = format!("{}{}", API_BASE, path);

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(AUTHORIZATION, format!("Bot {}", self.state.config.token));
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("{} {} failed", method, path))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES {
                let limited: RateLimited = response.json().await.unwrap_or_default();
                warn!("Rate limited on {} {}, retrying in {:.2}s", method, path, limited.retry_after);
                tokio::time::sleep(Duration::from_secs_f64(limited.retry_after.max(0.1))).await;
                continue;
            }
            return Ok(response);
        }
        Err(anyhow!("{} {} kept hitting the rate limit", method, path))
    }

    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let response = self.request(method.clone(), path, body).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} {} returned {}: {}", method, path, status, text));
        }
        Ok(response)
    }

    async fn call_json<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<&Value>) -> Result<T> {
        self.call(method.clone(), path, body)
            .await?
            .json::<T>()
            .await
            .with_context(|| format!("Unexpected response body from {} {}", method, path))
    }

    async fn webhook_token(&self, webhook_id: Snowflake) -> Result<String> {
        if let Some(token) = self.webhook_tokens.read().await.get(&webhook_id) {
            return Ok(token.clone());
        }
        let webhook: RawWebhook = self
            .call_json(Method::GET, &format!("/webhooks/{}", webhook_id), None)
            .await?;
        let token = webhook
            .token
            .ok_or_else(|| anyhow!("Webhook {} has no token", webhook_id))?;
        self.webhook_tokens.write().await.insert(webhook_id, token.clone());
        Ok(token)
    }

    fn reaction_path(channel_id: Snowflake, message_id: Snowflake, emoji: &EmojiData) -> String {
        format!(
            "/channels/{}/messages/{}/reactions/{}",
            channel_id,
            message_id,
            urlencoding::encode(&emoji.api_form())
        )
    }
}

#[async_trait]
impl PlatformConnection for DiscordConnection {
    async fn connect(&self) -> Result<()> {
        info!("Connecting to the Discord gateway...");

        let url = Url::parse(GATEWAY_URL).context("Failed to parse gateway URL")?;
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to the Discord gateway")?;
        let (write, mut read) = ws_stream.split();

        *self.state.writer.lock().await = Some(write);
        *self.state.connected.write().await = true;

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            info!("Discord gateway reader started");

            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => match state.handle_payload(&text).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => warn!("Failed to handle gateway payload: {:#}", e),
                    },
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Received binary message (ignoring)");
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Some(writer) = state.writer.lock().await.as_mut() {
                            if let Err(e) = writer.send(Message::Pong(payload)).await {
                                error!("Failed to send pong: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!("Received pong");
                    }
                    Some(Ok(Message::Close(close_frame))) => {
                        info!("Gateway connection closed: {:?}", close_frame);
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {
                        debug!("Received raw frame (ignoring)");
                    }
                    Some(Err(e)) => {
                        error!("Gateway error: {}", e);
                        break;
                    }
                    None => {
                        warn!("Gateway stream ended");
                        break;
                    }
                }
            }

            *state.connected.write().await = false;
            warn!("Discord gateway reader exited");
        });

        info!("Connected to the Discord gateway");
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "discord"
    }

    async fn is_connected(&self) -> bool {
        *self.state.connected.read().await
    }

    fn get_event_receiver(&self) -> Option<broadcast::Receiver<ChatEvent>> {
        Some(self.state.events.subscribe())
    }

    async fn current_user_id(&self) -> Option<Snowflake> {
        *self.state.user_id.read().await
    }

    async fn disconnect(&self) -> Result<()> {
        *self.state.connected.write().await = false;
        if let Some(mut writer) = self.state.writer.lock().await.take() {
            if let Err(e) = writer.send(Message::Close(None)).await {
                debug!("Close frame not delivered: {}", e);
            }
        }
        info!("Disconnected from Discord");
        Ok(())
    }

    async fn set_activity(&self, text: &str) -> Result<()> {
        self.state
            .send(
                opcode::PRESENCE_UPDATE,
                json!({
                    "since": null,
                    "activities": [{ "name": text, "type": 0 }],
                    "status": "online",
                    "afk": false,
                }),
            )
            .await
    }

    async fn send_message(&self, channel_id: Snowflake, message: &OutgoingMessage) -> Result<ChatMessage> {
        let raw: RawMessage = self
            .call_json(
                Method::POST,
                &format!("/channels/{}/messages", channel_id),
                Some(&message_body(message)),
            )
            .await?;
        Ok(raw.into())
    }

    async fn edit_message(&self, channel_id: Snowflake, message_id: Snowflake, message: &OutgoingMessage) -> Result<()> {
        self.call(
            Method::PATCH,
            &format!("/channels/{}/messages/{}", channel_id, message_id),
            Some(&message_body(message)),
        )
        .await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        self.call(Method::DELETE, &format!("/channels/{}/messages/{}", channel_id, message_id), None)
            .await?;
        self.state.messages.invalidate(&message_id);
        Ok(())
    }

    async fn get_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<ChatMessage> {
        let raw: RawMessage = self
            .call_json(Method::GET, &format!("/channels/{}/messages/{}", channel_id, message_id), None)
            .await?;
        Ok(raw.into())
    }

    async fn get_messages_before(&self, channel_id: Snowflake, before: Option<Snowflake>, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut collected = Vec::with_capacity(limit);
        let mut cursor = before;

        while collected.len() < limit {
            let page_size = (limit - collected.len()).min(HISTORY_PAGE_SIZE);
            let path = match cursor {
                Some(id) => format!("/channels/{}/messages?limit={}&before={}", channel_id, page_size, id),
                None => format!("/channels/{}/messages?limit={}", channel_id, page_size),
            };
            let page: Vec<RawMessage> = self.call_json(Method::GET, &path, None).await?;
            let exhausted = page.len() < page_size;

            collected.extend(page.into_iter().map(ChatMessage::from));
            cursor = collected.last().map(|m| m.id);
            if exhausted || cursor.is_none() {
                break;
            }
        }
        Ok(collected)
    }

    async fn get_channel(&self, channel_id: Snowflake) -> Result<ChannelInfo> {
        let raw: RawChannel = self
            .call_json(Method::GET, &format!("/channels/{}", channel_id), None)
            .await?;
        Ok(raw.into())
    }

    async fn get_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<Option<GuildMember>> {
        let path = format!("/guilds/{}/members/{}", guild_id, user_id);
        let response = self.request(Method::GET, &path, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("GET {} returned {}", path, status));
        }
        let raw: RawMember = response.json().await.context("Unexpected member payload")?;
        Ok(raw.into_member(guild_id, None))
    }

    async fn add_role(&self, guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake) -> Result<()> {
        self.call(
            Method::PUT,
            &format!("/guilds/{}/members/{}/roles/{}", guild_id, user_id, role_id),
            None,
        )
        .await?;
        Ok(())
    }

    async fn remove_role(&self, guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake) -> Result<()> {
        self.call(
            Method::DELETE,
            &format!("/guilds/{}/members/{}/roles/{}", guild_id, user_id, role_id),
            None,
        )
        .await?;
        Ok(())
    }

    async fn disconnect_voice(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<()> {
        self.call(
            Method::PATCH,
            &format!("/guilds/{}/members/{}", guild_id, user_id),
            Some(&json!({ "channel_id": null })),
        )
        .await?;
        Ok(())
    }

    async fn add_reaction(&self, channel_id: Snowflake, message_id: Snowflake, emoji: &EmojiData) -> Result<()> {
        let path = format!("{}/@me", Self::reaction_path(channel_id, message_id, emoji));
        self.call(Method::PUT, &path, None).await?;
        Ok(())
    }

    async fn remove_all_reactions(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        self.call(
            Method::DELETE,
            &format!("/channels/{}/messages/{}/reactions", channel_id, message_id),
            None,
        )
        .await?;
        Ok(())
    }

    async fn remove_emoji_reactions(&self, channel_id: Snowflake, message_id: Snowflake, emoji: &EmojiData) -> Result<()> {
        self.call(Method::DELETE, &Self::reaction_path(channel_id, message_id, emoji), None)
            .await?;
        Ok(())
    }

    async fn pin_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        self.call(Method::PUT, &format!("/channels/{}/pins/{}", channel_id, message_id), None)
            .await?;
        Ok(())
    }

    async fn unpin_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        self.call(Method::DELETE, &format!("/channels/{}/pins/{}", channel_id, message_id), None)
            .await?;
        Ok(())
    }

    async fn get_pinned_messages(&self, channel_id: Snowflake) -> Result<Vec<ChatMessage>> {
        let raw: Vec<RawMessage> = self
            .call_json(Method::GET, &format!("/channels/{}/pins", channel_id), None)
            .await?;
        Ok(raw.into_iter().map(ChatMessage::from).collect())
    }

    async fn execute_webhook(&self, webhook_id: Snowflake, message: &OutgoingMessage) -> Result<ChatMessage> {
        let token = self.webhook_token(webhook_id).await?;
        let raw: RawMessage = self
            .call_json(
                Method::POST,
                &format!("/webhooks/{}/{}?wait=true", webhook_id, token),
                Some(&message_body(message)),
            )
            .await?;
        Ok(raw.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embed;

    fn state() -> GatewayState {
        GatewayState::new(DiscordConfig {
            token: "token".to_string(),
            intents: DEFAULT_INTENTS,
        })
    }

    fn message_json(id: &str, content: &str) -> Value {
        json!({
            "id": id,
            "channel_id": "20",
            "guild_id": "30",
            "author": { "id": "40", "username": "alice", "discriminator": "0", "avatar": "abc" },
            "member": { "roles": ["7"], "nick": "Al" },
            "content": content,
            "type": 0,
            "timestamp": "2024-03-01T12:00:00.000000+00:00",
            "mentions": [],
            "reactions": [{ "count": 3, "me": false, "emoji": { "id": "55", "name": "rim" } }],
            "attachments": [{ "url": "https://cdn.example/a.png", "filename": "a.png" }],
            "embeds": [{ "title": "quoted", "thumbnail": { "url": "https://cdn.example/t.png" } }],
        })
    }

    #[tokio::test]
    async fn test_message_create_translation() {
        let state = state();
        let event = state
            .translate("MESSAGE_CREATE", message_json("10", "hello"))
            .await
            .unwrap()
            .unwrap();

        let ChatEvent::MessageCreated(message) = event else {
            panic!("expected a created message");
        };
        assert_eq!(message.id, 10);
        assert_eq!(message.guild_id, Some(30));
        assert_eq!(
            message.author.avatar_url.as_deref(),
            Some("https://cdn.discordapp.com/avatars/40/abc.png")
        );
        let member = message.member.as_ref().unwrap();
        assert_eq!(member.display_name(), "Al");
        assert_eq!(member.roles, vec![7]);
        assert_eq!(message.reactions[0].count, 3);
        assert!(matches!(message.reactions[0].emoji, EmojiData::Custom { id: 55, .. }));
        assert_eq!(message.attachments[0].filename, "a.png");
        assert_eq!(message.embeds[0].thumbnail_url.as_deref(), Some("https://cdn.example/t.png"));
    }

    #[tokio::test]
    async fn test_message_update_carries_cached_before() {
        let state = state();
        state.translate("MESSAGE_CREATE", message_json("10", "first")).await.unwrap();

        let event = state
            .translate("MESSAGE_UPDATE", message_json("10", "second"))
            .await
            .unwrap()
            .unwrap();
        let ChatEvent::MessageUpdated { before, after } = event else {
            panic!("expected an update");
        };
        assert_eq!(before.unwrap().content, "first");
        assert_eq!(after.content, "second");

        let partial = json!({ "id": "10", "channel_id": "20", "embeds": [] });
        assert!(state.translate("MESSAGE_UPDATE", partial).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_member_update_reports_previous_roles() {
        let state = state();
        let joined = json!({
            "guild_id": "30",
            "user": { "id": "40", "username": "alice" },
            "roles": ["1"],
            "joined_at": "2024-03-01T12:00:00+00:00",
        });
        let added = state.translate("GUILD_MEMBER_ADD", joined).await.unwrap();
        assert!(matches!(added, Some(ChatEvent::MemberAdded(_))));

        let updated = json!({
            "guild_id": "30",
            "user": { "id": "40", "username": "alice" },
            "roles": ["1", "2"],
        });
        let Some(ChatEvent::MemberUpdated { roles_before, member }) =
            state.translate("GUILD_MEMBER_UPDATE", updated).await.unwrap()
        else {
            panic!("expected a member update");
        };
        assert_eq!(roles_before, Some(vec![1]));
        assert_eq!(member.roles, vec![1, 2]);

        let unknown = json!({ "guild_id": "30", "user": { "id": "41", "username": "bob" }, "roles": [] });
        let Some(ChatEvent::MemberUpdated { roles_before, .. }) =
            state.translate("GUILD_MEMBER_UPDATE", unknown).await.unwrap()
        else {
            panic!("expected a member update");
        };
        assert!(roles_before.is_none());
    }

    #[tokio::test]
    async fn test_reaction_events() {
        let state = state();
        let added = json!({
            "user_id": "40",
            "channel_id": "20",
            "message_id": "10",
            "guild_id": "30",
            "emoji": { "id": null, "name": "⭐" },
            "member": { "user": { "id": "40", "username": "alice" }, "roles": ["3"] },
        });
        let Some(ChatEvent::ReactionAdded(reaction)) = state.translate("MESSAGE_REACTION_ADD", added).await.unwrap() else {
            panic!("expected a reaction");
        };
        assert_eq!(reaction.emoji, EmojiData::unicode("⭐"));
        assert_eq!(reaction.member.unwrap().roles, vec![3]);

        let cleared = json!({ "channel_id": "20", "message_id": "10", "guild_id": "30" });
        let event = state.translate("MESSAGE_REACTION_REMOVE_ALL", cleared).await.unwrap();
        assert!(matches!(
            event,
            Some(ChatEvent::ReactionsCleared { channel_id: 20, message_id: 10, .. })
        ));
    }

    #[test]
    fn test_outgoing_body_uses_nested_embed_shape() {
        let mut embed = Embed::new("Pinned").footer("by alice");
        embed.image_url = Some("https://cdn.example/a.png".to_string());
        let body = message_body(&OutgoingMessage::embed(embed));

        assert!(body.get("content").is_none());
        assert_eq!(body["embeds"][0]["image"]["url"], "https://cdn.example/a.png");
        assert_eq!(body["embeds"][0]["footer"]["text"], "by alice");
        assert!(body["embeds"][0].get("thumbnail").is_none());
    }

    #[test]
    fn test_thread_channels_resolve_parent() {
        let raw: RawChannel =
            serde_json::from_value(json!({ "id": "5", "type": 11, "guild_id": "30", "parent_id": "4" })).unwrap();
        let channel = ChannelInfo::from(raw);
        assert!(channel.is_thread);
        assert_eq!(channel.effective_id(), 4);
    }
}
