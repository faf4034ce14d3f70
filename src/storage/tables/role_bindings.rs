//! Reaction role bindings.

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use super::super::{parse_id, Database};
use crate::types::{EmojiData, Snowflake};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBinding {
    pub message_id: Snowflake,
    pub role_id: Snowflake,
    pub is_unicode: bool,
    /// Unicode glyph, or the custom emoji id.
    pub emoji_data: String,
}

impl RoleBinding {
    pub fn new(message_id: Snowflake, role_id: Snowflake, emoji: &EmojiData) -> Self {
        Self {
            message_id,
            role_id,
            is_unicode: emoji.is_unicode(),
            emoji_data: emoji.storage_value(),
        }
    }

    pub fn matches(&self, emoji: &EmojiData) -> bool {
        self.is_unicode == emoji.is_unicode() && self.emoji_data == emoji.storage_value()
    }
}

const BINDING_COLUMNS: &str = "message_id, role_id, is_unicode, emoji_data";

fn read_binding(row: &Row<'_>) -> rusqlite::Result<RoleBinding> {
    Ok(RoleBinding {
        message_id: parse_id(row.get(0)?)?,
        role_id: parse_id(row.get(1)?)?,
        is_unicode: row.get(2)?,
        emoji_data: row.get(3)?,
    })
}

impl Database {
    /// Returns false when the (message, emoji) pair is already bound.
    pub fn insert_role_binding(&self, binding: &RoleBinding) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO role_bindings (message_id, role_id, is_unicode, emoji_data) VALUES (?1, ?2, ?3, ?4)",
            params![
                binding.message_id.to_string(),
                binding.role_id.to_string(),
                binding.is_unicode,
                binding.emoji_data
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn role_bindings_for_message(&self, message_id: Snowflake) -> Result<Vec<RoleBinding>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM role_bindings WHERE message_id = ?1 ORDER BY rowid",
            BINDING_COLUMNS
        ))?;
        let bindings = stmt
            .query_map(params![message_id.to_string()], read_binding)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bindings)
    }

    pub fn role_binding(&self, message_id: Snowflake, emoji: &EmojiData) -> Result<Option<RoleBinding>> {
        let conn = self.conn()?;
        let binding = conn
            .query_row(
                &format!(
                    "SELECT {} FROM role_bindings WHERE message_id = ?1 AND is_unicode = ?2 AND emoji_data = ?3",
                    BINDING_COLUMNS
                ),
                params![message_id.to_string(), emoji.is_unicode(), emoji.storage_value()],
                read_binding,
            )
            .optional()?;
        Ok(binding)
    }

    pub fn remove_role_binding(&self, message_id: Snowflake, emoji: &EmojiData) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM role_bindings WHERE message_id = ?1 AND is_unicode = ?2 AND emoji_data = ?3",
            params![message_id.to_string(), emoji.is_unicode(), emoji.storage_value()],
        )?;
        Ok(removed > 0)
    }
}
