//! Scheduled unmutes.

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use super::super::{parse_id, Database};
use crate::types::Snowflake;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledMute {
    /// Id of the command message that created the mute.
    pub token: String,
    pub user_id: Snowflake,
    pub text: String,
    /// Minutes since the unix epoch.
    pub trigger_minute: i64,
    pub guild_id: Snowflake,
}

const MUTE_COLUMNS: &str = "id, user_id, message, trigger_time, guild_id";

fn read_mute(row: &Row<'_>) -> rusqlite::Result<ScheduledMute> {
    Ok(ScheduledMute {
        token: row.get(0)?,
        user_id: parse_id(row.get(1)?)?,
        text: row.get(2)?,
        trigger_minute: row.get(3)?,
        guild_id: parse_id(row.get(4)?)?,
    })
}

impl Database {
    pub fn insert_mute(&self, mute: &ScheduledMute) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO mutes (id, user_id, message, trigger_time, guild_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                mute.token,
                mute.user_id.to_string(),
                mute.text,
                mute.trigger_minute,
                mute.guild_id.to_string()
            ],
        )?;
        Ok(())
    }

    pub fn get_mute(&self, token: &str) -> Result<Option<ScheduledMute>> {
        let conn = self.conn()?;
        let mute = conn
            .query_row(
                &format!("SELECT {} FROM mutes WHERE id = ?1", MUTE_COLUMNS),
                params![token],
                read_mute,
            )
            .optional()?;
        Ok(mute)
    }

    pub fn get_user_mute(&self, user_id: Snowflake, guild_id: Snowflake) -> Result<Option<ScheduledMute>> {
        let conn = self.conn()?;
        let mute = conn
            .query_row(
                &format!("SELECT {} FROM mutes WHERE user_id = ?1 AND guild_id = ?2", MUTE_COLUMNS),
                params![user_id.to_string(), guild_id.to_string()],
                read_mute,
            )
            .optional()?;
        Ok(mute)
    }

    pub fn list_mutes(&self) -> Result<Vec<ScheduledMute>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM mutes ORDER BY trigger_time, id", MUTE_COLUMNS))?;
        let mutes = stmt.query_map([], read_mute)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mutes)
    }

    pub fn due_mutes(&self, now_minute: i64) -> Result<Vec<ScheduledMute>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mutes WHERE trigger_time <= ?1 ORDER BY trigger_time, id",
            MUTE_COLUMNS
        ))?;
        let mutes = stmt
            .query_map(params![now_minute], read_mute)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mutes)
    }

    /// Delete by token. Returns true only for the caller that removed the row,
    /// which makes it usable as a claim before firing.
    pub fn remove_mute(&self, token: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM mutes WHERE id = ?1", params![token])?;
        Ok(removed == 1)
    }

    pub fn remove_user_mutes(&self, user_id: Snowflake, guild_id: Snowflake) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM mutes WHERE user_id = ?1 AND guild_id = ?2",
            params![user_id.to_string(), guild_id.to_string()],
        )?;
        Ok(removed)
    }

    /// Drop the user's mutes in the guild and insert `mute` in one write transaction.
    /// Returns true when an earlier mute was replaced.
    pub fn replace_user_mute(&self, mute: &ScheduledMute) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute(
            "DELETE FROM mutes WHERE user_id = ?1 AND guild_id = ?2",
            params![mute.user_id.to_string(), mute.guild_id.to_string()],
        )?;
        tx.execute(
            "INSERT INTO mutes (id, user_id, message, trigger_time, guild_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                mute.token,
                mute.user_id.to_string(),
                mute.text,
                mute.trigger_minute,
                mute.guild_id.to_string()
            ],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    pub fn user_is_muted(&self, user_id: Snowflake, guild_id: Snowflake) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM mutes WHERE user_id = ?1 AND guild_id = ?2)",
            params![user_id.to_string(), guild_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mute(token: &str, user: Snowflake, minute: i64) -> ScheduledMute {
        ScheduledMute {
            token: token.to_string(),
            user_id: user,
            text: "spam".to_string(),
            trigger_minute: minute,
            guild_id: 1,
        }
    }

    #[test]
    fn test_due_and_claim() {
        let db = Database::open_in_memory().unwrap();
        db.insert_mute(&mute("a", 10, 100)).unwrap();
        db.insert_mute(&mute("b", 11, 200)).unwrap();

        let due = db.due_mutes(150).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].token, "a");

        assert!(db.remove_mute("a").unwrap());
        assert!(!db.remove_mute("a").unwrap());
        assert_eq!(db.list_mutes().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.insert_mute(&mute("a", 10, 100)).unwrap();
        assert!(db.insert_mute(&mute("a", 12, 300)).is_err());
    }

    #[test]
    fn test_user_lookup_and_removal() {
        let db = Database::open_in_memory().unwrap();
        db.insert_mute(&mute("a", 10, 100)).unwrap();

        assert!(db.user_is_muted(10, 1).unwrap());
        assert!(!db.user_is_muted(10, 2).unwrap());
        assert_eq!(db.get_user_mute(10, 1).unwrap().map(|m| m.token), Some("a".to_string()));

        assert_eq!(db.remove_user_mutes(10, 1).unwrap(), 1);
        assert!(db.get_mute("a").unwrap().is_none());
    }

    #[test]
    fn test_replace_user_mute() {
        let db = Database::open_in_memory().unwrap();
        db.insert_mute(&mute("a", 10, 100)).unwrap();
        db.insert_mute(&mute("other", 11, 100)).unwrap();

        assert!(db.replace_user_mute(&mute("b", 10, 200)).unwrap());
        assert!(!db.replace_user_mute(&mute("c", 12, 300)).unwrap());

        let tokens: Vec<String> = db.list_mutes().unwrap().into_iter().map(|m| m.token).collect();
        assert_eq!(tokens, vec!["other", "b", "c"]);
    }

    #[test]
    fn test_failed_replace_keeps_previous_mute() {
        let db = Database::open_in_memory().unwrap();
        db.insert_mute(&mute("a", 10, 100)).unwrap();
        db.insert_mute(&mute("b", 11, 100)).unwrap();

        // token "b" is taken, so the insert fails and the delete rolls back
        assert!(db.replace_user_mute(&mute("b", 10, 200)).is_err());
        assert_eq!(db.get_user_mute(10, 1).unwrap().map(|m| m.token), Some("a".to_string()));
    }

    #[test]
    fn test_large_snowflakes_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let big = u64::MAX - 5;
        db.insert_mute(&ScheduledMute { guild_id: big, ..mute("x", big, 1) }).unwrap();
        let stored = db.get_mute("x").unwrap().unwrap();
        assert_eq!(stored.user_id, big);
        assert_eq!(stored.guild_id, big);
    }
}
