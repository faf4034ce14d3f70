//! Scheduled reminders.

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use super::super::{parse_id, Database};
use crate::types::Snowflake;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledReminder {
    pub token: String,
    pub owner_id: Snowflake,
    pub channel_id: Snowflake,
    pub text: String,
    pub trigger_minute: i64,
    /// Extra users to ping, stored whitespace separated.
    pub mentions: Vec<Snowflake>,
}

const REMINDER_COLUMNS: &str = "id, user_id, channel_id, message, trigger_time, mentions";

fn read_reminder(row: &Row<'_>) -> rusqlite::Result<ScheduledReminder> {
    let mentions: String = row.get(5)?;
    Ok(ScheduledReminder {
        token: row.get(0)?,
        owner_id: parse_id(row.get(1)?)?,
        channel_id: parse_id(row.get(2)?)?,
        text: row.get(3)?,
        trigger_minute: row.get(4)?,
        mentions: mentions.split_whitespace().filter_map(|s| s.parse().ok()).collect(),
    })
}

impl Database {
    pub fn insert_reminder(&self, reminder: &ScheduledReminder) -> Result<()> {
        let mentions = reminder
            .mentions
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reminders (id, user_id, channel_id, message, trigger_time, mentions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                reminder.token,
                reminder.owner_id.to_string(),
                reminder.channel_id.to_string(),
                reminder.text,
                reminder.trigger_minute,
                mentions
            ],
        )?;
        Ok(())
    }

    pub fn get_reminder(&self, token: &str) -> Result<Option<ScheduledReminder>> {
        let conn = self.conn()?;
        let reminder = conn
            .query_row(
                &format!("SELECT {} FROM reminders WHERE id = ?1", REMINDER_COLUMNS),
                params![token],
                read_reminder,
            )
            .optional()?;
        Ok(reminder)
    }

    pub fn list_reminders(&self) -> Result<Vec<ScheduledReminder>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reminders ORDER BY trigger_time, id",
            REMINDER_COLUMNS
        ))?;
        let reminders = stmt.query_map([], read_reminder)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(reminders)
    }

    pub fn due_reminders(&self, now_minute: i64) -> Result<Vec<ScheduledReminder>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reminders WHERE trigger_time <= ?1 ORDER BY trigger_time, id",
            REMINDER_COLUMNS
        ))?;
        let reminders = stmt
            .query_map(params![now_minute], read_reminder)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(reminders)
    }

    /// Delete by token; true only for the caller that removed the row.
    pub fn remove_reminder(&self, token: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM reminders WHERE id = ?1", params![token])?;
        Ok(removed == 1)
    }
}
