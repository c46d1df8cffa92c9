//! Read-side queries over persisted tag aggregates.

use rusqlite::params;

use crate::db::TagCostDatabase;
use crate::error::Result;
use crate::models::{NONE_VALUE, TagAggregate};

/// Query interface for persisted tag aggregates.
pub struct TagQuery<'a> {
    db: &'a TagCostDatabase,
}

impl<'a> TagQuery<'a> {
    /// Create a new query interface.
    pub fn new(db: &'a TagCostDatabase) -> Self {
        Self { db }
    }

    /// Distinct tag keys with persisted aggregates, alphabetically.
    pub fn tag_keys(&self) -> Result<Vec<String>> {
        let conn = self.db.lock()?;

        let mut stmt = conn.prepare("SELECT DISTINCT key FROM tag_aggregates ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    /// All aggregates for `key`, most expensive first.
    pub fn values_for_key(&self, key: &str) -> Result<Vec<TagAggregate>> {
        self.top_values_by_cost(key, None)
    }

    /// The `limit` most expensive values of `key` (all when `None`).
    pub fn top_values_by_cost(&self, key: &str, limit: Option<usize>) -> Result<Vec<TagAggregate>> {
        let conn = self.db.lock()?;

        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map_or(-1, |l| l as i64);
        let mut stmt = conn.prepare(
            "SELECT key, value, count, cost, hourly, monthly
             FROM tag_aggregates
             WHERE key = ?1
             ORDER BY cost DESC, value ASC
             LIMIT ?2",
        )?;

        let aggregates = stmt
            .query_map(params![key, limit], TagCostDatabase::row_to_aggregate)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(aggregates)
    }

    /// Fraction of resources lacking `key`, by count.
    ///
    /// `None` when the key has no persisted aggregates or they count zero
    /// resources.
    pub fn untagged_share(&self, key: &str) -> Result<Option<f64>> {
        let rows = self.values_for_key(key)?;
        let total: i64 = rows.iter().map(|a| a.count).sum();
        if total == 0 {
            return Ok(None);
        }

        let untagged = rows
            .iter()
            .find(|a| a.value == NONE_VALUE)
            .map_or(0, |a| a.count);
        Ok(Some(untagged as f64 / total as f64))
    }
}
