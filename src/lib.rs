//! # Stellarch
//!
//! Community moderation bot for a single Discord guild.
//!
//! ## Features
//!
//! - **Profanity filter**: regex masks and literal words, scanned off the event path
//! - **Timed mutes and reminders**: persisted and delivered by a background poller
//! - **Mention auditing**: who pinged whom, and what replaced an edited ping
//! - **Highlight board**: reposts and pins messages that collect enough reactions
//! - **Reaction roles**: self-assignable roles bound to emoji on a message
//! - **Admission**: new arrivals are screened and promoted in the introduction channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stellarch::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = SettingsStore::load_or_create("data/settings.yaml").await?;
//!     let db = Database::open("data/stellarch.db")?;
//!     let platform = Arc::new(DiscordConnection::new(DiscordConfig::from_env()?));
//!
//!     let bot = ChatBot::new(platform, settings, db, &[]).await?;
//!     bot.start().await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod storage;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::ChatBot;
    pub use crate::config::{BotSettings, SettingsStore};
    pub use crate::platforms::{
        discord::{DiscordConfig, DiscordConnection},
        PlatformConnection,
    };
    pub use crate::storage::Database;
    pub use crate::types::{ChatEvent, ChatMessage, EmojiData, Snowflake};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
