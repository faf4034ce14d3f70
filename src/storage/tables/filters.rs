//! Filter masks and excludes.

use anyhow::Result;
use rusqlite::params;

use super::super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Mask = 1,
    Exclude = 2,
}

impl FilterKind {
    pub fn label(&self) -> &'static str {
        match self {
            FilterKind::Mask => "mask",
            FilterKind::Exclude => "exclude",
        }
    }
}

impl Database {
    /// All patterns of one kind, in insertion order.
    pub fn filter_rules(&self, kind: FilterKind) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT pattern FROM filter_rules WHERE kind = ?1 ORDER BY rowid")?;
        let rules = stmt
            .query_map(params![kind as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    /// Returns false when the (kind, pattern) pair already exists.
    pub fn add_filter_rule(&self, kind: FilterKind, pattern: &str) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO filter_rules (kind, pattern) VALUES (?1, ?2)",
            params![kind as i64, pattern],
        )?;
        Ok(inserted == 1)
    }

    /// Returns false when nothing matched.
    pub fn remove_filter_rule(&self, kind: FilterKind, pattern: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM filter_rules WHERE kind = ?1 AND pattern = ?2",
            params![kind as i64, pattern],
        )?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_list_remove() {
        let db = Database::open_in_memory().unwrap();

        assert!(db.add_filter_rule(FilterKind::Mask, "d[a4]mn").unwrap());
        assert!(db.add_filter_rule(FilterKind::Mask, "heck").unwrap());
        assert!(db.add_filter_rule(FilterKind::Exclude, "goddamnit").unwrap());
        assert!(!db.add_filter_rule(FilterKind::Mask, "heck").unwrap());

        assert_eq!(db.filter_rules(FilterKind::Mask).unwrap(), vec!["d[a4]mn", "heck"]);
        assert_eq!(db.filter_rules(FilterKind::Exclude).unwrap(), vec!["goddamnit"]);

        assert!(db.remove_filter_rule(FilterKind::Mask, "heck").unwrap());
        assert!(!db.remove_filter_rule(FilterKind::Exclude, "heck").unwrap());
        assert_eq!(db.filter_rules(FilterKind::Mask).unwrap(), vec!["d[a4]mn"]);
    }
}
