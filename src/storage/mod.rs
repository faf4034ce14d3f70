//! SQLite backing store shared by every feature system.
//!
//! Each module under `tables` adds an `impl Database` block for one table.
//! Identifiers are stored as text, trigger times as integer minutes since the epoch.

use anyhow::{Context, Result};
use log::info;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

pub mod tables;

pub use tables::filters::FilterKind;
pub use tables::mutes::ScheduledMute;
pub use tables::pins::PinnedEntry;
pub use tables::reminders::ScheduledReminder;
pub use tables::role_bindings::RoleBinding;

type SqlitePool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
            }
        }

        let manager = SqliteConnectionManager::file(path)
            .with_init(|c| c.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;"));
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        let db = Self { pool };
        db.init()?;
        info!("Opened database at {}", path.display());
        Ok(db)
    }

    /// Single-connection in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())
            .context("Failed to open in-memory database")?;
        let db = Self { pool };
        db.init()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().context("Failed to get database connection")
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS filter_rules (
                kind INTEGER NOT NULL,
                pattern TEXT NOT NULL,
                PRIMARY KEY (kind, pattern)
            );

            CREATE TABLE IF NOT EXISTS mutes (
                id TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL,
                message TEXT NOT NULL,
                trigger_time INTEGER NOT NULL,
                guild_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_mutes_trigger ON mutes (trigger_time);
            CREATE INDEX IF NOT EXISTS idx_mutes_user ON mutes (user_id, guild_id);

            CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                message TEXT NOT NULL,
                trigger_time INTEGER NOT NULL,
                mentions TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_reminders_trigger ON reminders (trigger_time);

            CREATE TABLE IF NOT EXISTS pins (
                original_message_id TEXT PRIMARY KEY NOT NULL,
                pinned_message_id TEXT NOT NULL,
                original_channel_id TEXT NOT NULL,
                pinned_channel_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pins_pinned ON pins (pinned_message_id);

            CREATE TABLE IF NOT EXISTS role_bindings (
                message_id TEXT NOT NULL,
                role_id TEXT NOT NULL,
                is_unicode INTEGER NOT NULL,
                emoji_data TEXT NOT NULL,
                PRIMARY KEY (message_id, is_unicode, emoji_data)
            );",
        )
        .context("Failed to initialise schema")?;

        Ok(())
    }
}

/// Parse a snowflake column stored as text.
pub(crate) fn parse_id(value: String) -> rusqlite::Result<u64> {
    value
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_file_and_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db").join("bot.db");

        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        db.add_filter_rule(FilterKind::Mask, "bad").unwrap();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.filter_rules(FilterKind::Mask).unwrap(), vec!["bad".to_string()]);
    }
}
