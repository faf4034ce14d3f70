//! Highlight board reposts.

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use super::super::{parse_id, Database};
use crate::types::Snowflake;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedEntry {
    pub original_message_id: Snowflake,
    pub pinned_message_id: Snowflake,
    pub original_channel_id: Snowflake,
    pub pinned_channel_id: Snowflake,
}

const PIN_COLUMNS: &str = "original_message_id, pinned_message_id, original_channel_id, pinned_channel_id";

fn read_pin(row: &Row<'_>) -> rusqlite::Result<PinnedEntry> {
    Ok(PinnedEntry {
        original_message_id: parse_id(row.get(0)?)?,
        pinned_message_id: parse_id(row.get(1)?)?,
        original_channel_id: parse_id(row.get(2)?)?,
        pinned_channel_id: parse_id(row.get(3)?)?,
    })
}

impl Database {
    pub fn insert_pin(&self, pin: &PinnedEntry) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pins (original_message_id, pinned_message_id, original_channel_id, pinned_channel_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                pin.original_message_id.to_string(),
                pin.pinned_message_id.to_string(),
                pin.original_channel_id.to_string(),
                pin.pinned_channel_id.to_string()
            ],
        )?;
        Ok(())
    }

    pub fn pin_by_original(&self, original_message_id: Snowflake) -> Result<Option<PinnedEntry>> {
        let conn = self.conn()?;
        let pin = conn
            .query_row(
                &format!("SELECT {} FROM pins WHERE original_message_id = ?1", PIN_COLUMNS),
                params![original_message_id.to_string()],
                read_pin,
            )
            .optional()?;
        Ok(pin)
    }

    pub fn pin_by_repost(&self, pinned_message_id: Snowflake) -> Result<Option<PinnedEntry>> {
        let conn = self.conn()?;
        let pin = conn
            .query_row(
                &format!("SELECT {} FROM pins WHERE pinned_message_id = ?1", PIN_COLUMNS),
                params![pinned_message_id.to_string()],
                read_pin,
            )
            .optional()?;
        Ok(pin)
    }

    pub fn remove_pin(&self, original_message_id: Snowflake) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM pins WHERE original_message_id = ?1",
            params![original_message_id.to_string()],
        )?;
        Ok(removed > 0)
    }
}
