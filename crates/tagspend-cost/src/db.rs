//! SQLite storage for resource records and tag aggregates.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::{debug, info, warn};

use crate::error::{CostError, Result};
use crate::models::{ResourceRecord, Tag, TagAggregate};
use crate::pipeline::{AggregateSink, RecordStore};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// Maximum retries for database lock errors.
const DB_LOCK_MAX_RETRIES: u32 = 5;

/// Initial delay for database lock retry (in milliseconds).
const DB_LOCK_INITIAL_DELAY_MS: u64 = 50;

/// Maximum delay for database lock retry.
const DB_LOCK_MAX_DELAY: Duration = Duration::from_secs(5);

/// How long SQLite itself waits on a competing connection before reporting busy.
const DB_BUSY_TIMEOUT: Duration = Duration::from_secs(1);

const RESOURCE_COLUMNS: &str = "id, resource_identifier, service, name, vendor_account_id, provider,
     region, os, node_type, effective_hourly, total_spend, last_seen, hours_running";

/// SQLite database holding resources, their tags, and tag aggregates.
pub struct TagCostDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl TagCostDatabase {
    /// Open or create a database at the given path.
    ///
    /// File databases use WAL so an aggregation can read while another
    /// process ingests.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "Opened database");
        conn.busy_timeout(DB_BUSY_TIMEOUT)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| CostError::Lock(e.to_string()))
    }

    /// Execute a database operation with automatic retry on lock errors.
    ///
    /// Backoff doubles per attempt up to [`DB_LOCK_MAX_DELAY`], with random
    /// jitter of up to half the current delay. Once the retries are used up
    /// the lock error is returned as [`CostError::DatabaseLocked`].
    fn with_retry<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        let mut delay = Duration::from_millis(DB_LOCK_INITIAL_DELAY_MS);

        loop {
            attempt += 1;

            match f() {
                Ok(result) => {
                    if attempt > 1 {
                        info!(attempt, operation, "Database operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(ref e) if e.is_retryable() && attempt <= DB_LOCK_MAX_RETRIES => {
                    let jitter_ms = rand::rng().random_range(0..=delay.as_millis() as u64 / 2);
                    let wait = delay + Duration::from_millis(jitter_ms);
                    warn!(
                        attempt,
                        max_retries = DB_LOCK_MAX_RETRIES,
                        delay_ms = wait.as_millis(),
                        operation,
                        "Database locked, retrying with backoff"
                    );

                    std::thread::sleep(wait);
                    delay = std::cmp::min(delay * 2, DB_LOCK_MAX_DELAY);
                }
                Err(e) if e.is_database_locked() => {
                    warn!(attempt, operation, error = %e, "Database still locked, giving up");
                    return Err(CostError::DatabaseLocked {
                        retry_count: attempt - 1,
                        max_retries: DB_LOCK_MAX_RETRIES,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    if attempt > 1 {
                        warn!(attempt, operation, error = %e, "Database operation failed after retries");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Run database migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if current_version < SCHEMA_VERSION {
            info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );
            Self::migration_v1(&conn)
                .map_err(|e| CostError::Migration(format!("v1 failed: {}", e)))?;
        }

        Ok(())
    }

    /// Migration to version 1: resources, tags, tag aggregates.
    fn migration_v1(conn: &Connection) -> Result<()> {
        debug!("Running migration v1: initial schema");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS resources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_identifier TEXT NOT NULL UNIQUE,
                service TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL DEFAULT '',
                vendor_account_id TEXT NOT NULL DEFAULT '',
                provider TEXT NOT NULL DEFAULT '',
                region TEXT NOT NULL DEFAULT '',
                os TEXT NOT NULL DEFAULT '',
                node_type TEXT NOT NULL DEFAULT '',
                effective_hourly REAL NOT NULL DEFAULT 0,
                total_spend REAL NOT NULL DEFAULT 0,
                last_seen TEXT,
                hours_running INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_id INTEGER NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tags_resource ON tags(resource_id);
            CREATE INDEX IF NOT EXISTS idx_tags_key ON tags(key);

            CREATE TABLE IF NOT EXISTS tag_aggregates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                cost REAL NOT NULL DEFAULT 0,
                hourly REAL NOT NULL DEFAULT 0,
                monthly REAL NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                UNIQUE(key, value)
            );

            CREATE INDEX IF NOT EXISTS idx_tag_aggregates_key ON tag_aggregates(key);

            INSERT INTO schema_version (version) VALUES (1);",
        )?;

        info!("Migration v1 completed");
        Ok(())
    }

    // ============ Resource Methods ============

    /// Insert or replace a batch of records in one transaction.
    ///
    /// Existing records with the same identifier are overwritten, tags
    /// included.
    pub fn upsert_records(&self, records: &[ResourceRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let count = self.with_retry("upsert_records", || {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            for record in records {
                Self::upsert_record_in_tx(&tx, record)?;
            }
            tx.commit()?;
            Ok(records.len())
        })?;

        debug!(count, "Upserted resource records");
        Ok(count)
    }

    fn upsert_record_in_tx(tx: &Transaction, record: &ResourceRecord) -> Result<()> {
        tx.execute(
            "INSERT INTO resources
             (resource_identifier, service, name, vendor_account_id, provider, region, os,
              node_type, effective_hourly, total_spend, last_seen, hours_running, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(resource_identifier) DO UPDATE SET
                service = excluded.service,
                name = excluded.name,
                vendor_account_id = excluded.vendor_account_id,
                provider = excluded.provider,
                region = excluded.region,
                os = excluded.os,
                node_type = excluded.node_type,
                effective_hourly = excluded.effective_hourly,
                total_spend = excluded.total_spend,
                last_seen = excluded.last_seen,
                hours_running = excluded.hours_running,
                updated_at = excluded.updated_at",
            params![
                record.resource_identifier,
                record.service,
                record.name,
                record.vendor_account_id,
                record.provider,
                record.region,
                record.os,
                record.node_type,
                record.effective_hourly,
                record.total_spend,
                record.last_seen.map(|t| t.to_rfc3339()),
                record.hours_running,
                Utc::now().to_rfc3339(),
            ],
        )?;

        // last_insert_rowid is not updated on the conflict path
        let resource_id: i64 = tx.query_row(
            "SELECT id FROM resources WHERE resource_identifier = ?1",
            params![record.resource_identifier],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM tags WHERE resource_id = ?1", params![resource_id])?;

        let mut stmt = tx.prepare_cached(
            "INSERT INTO tags (resource_id, position, key, value) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (position, tag) in record.tags.iter().enumerate() {
            stmt.execute(params![resource_id, position as i64, tag.key, tag.value])?;
        }

        Ok(())
    }

    /// Load every record with its tags, ordered by insertion.
    ///
    /// Both tables are read inside one transaction so a concurrent writer
    /// cannot leave a record paired with a partial tag set.
    pub fn get_all_records(&self) -> Result<Vec<ResourceRecord>> {
        self.with_retry("get_all_records", || {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;

            let mut tags_by_resource: HashMap<i64, Vec<Tag>> = HashMap::new();
            {
                let mut stmt = tx
                    .prepare("SELECT resource_id, key, value FROM tags ORDER BY resource_id, position")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, Tag::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
                })?;
                for row in rows {
                    let (resource_id, tag) = row?;
                    tags_by_resource.entry(resource_id).or_default().push(tag);
                }
            }

            let mut records = Vec::new();
            {
                let mut stmt =
                    tx.prepare(&format!("SELECT {RESOURCE_COLUMNS} FROM resources ORDER BY id"))?;
                let rows = stmt.query_map([], Self::row_to_record)?;
                for row in rows {
                    let (id, mut record) = row?;
                    record.tags = tags_by_resource.remove(&id).unwrap_or_default();
                    records.push(record);
                }
            }

            tx.commit()?;
            Ok(records)
        })
    }

    /// Get a single record by identifier.
    pub fn get_record(&self, resource_identifier: &str) -> Result<Option<ResourceRecord>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let found = tx
            .query_row(
                &format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE resource_identifier = ?1"),
                params![resource_identifier],
                Self::row_to_record,
            )
            .optional()?;

        let Some((id, mut record)) = found else {
            return Ok(None);
        };

        record.tags = {
            let mut stmt =
                tx.prepare("SELECT key, value FROM tags WHERE resource_id = ?1 ORDER BY position")?;
            stmt.query_map(params![id], |row| Ok(Tag::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;

        Ok(Some(record))
    }

    /// Number of stored records.
    pub fn count_records(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM resources", [], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<(i64, ResourceRecord)> {
        let last_seen: Option<String> = row.get(11)?;
        let record = ResourceRecord {
            resource_identifier: row.get(1)?,
            service: row.get(2)?,
            name: row.get(3)?,
            vendor_account_id: row.get(4)?,
            provider: row.get(5)?,
            region: row.get(6)?,
            os: row.get(7)?,
            node_type: row.get(8)?,
            effective_hourly: row.get(9)?,
            total_spend: row.get(10)?,
            last_seen: last_seen
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc)),
            hours_running: row.get(12)?,
            tags: Vec::new(),
        };
        Ok((row.get(0)?, record))
    }

    // ============ Tag Aggregate Methods ============

    /// Insert or overwrite the aggregate row for (key, value).
    pub fn upsert_tag_aggregate(&self, aggregate: &TagAggregate) -> Result<()> {
        self.with_retry("upsert_tag_aggregate", || {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO tag_aggregates (key, value, count, cost, hourly, monthly, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(key, value) DO UPDATE SET
                    count = excluded.count,
                    cost = excluded.cost,
                    hourly = excluded.hourly,
                    monthly = excluded.monthly,
                    updated_at = excluded.updated_at",
                params![
                    aggregate.key,
                    aggregate.value,
                    aggregate.count,
                    aggregate.cost,
                    aggregate.hourly,
                    aggregate.monthly,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        debug!(key = %aggregate.key, value = %aggregate.value, count = aggregate.count, "Upserted tag aggregate");
        Ok(())
    }

    /// Every persisted aggregate, ordered by key then value.
    pub fn list_tag_aggregates(&self) -> Result<Vec<TagAggregate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, value, count, cost, hourly, monthly
             FROM tag_aggregates
             ORDER BY key, value",
        )?;

        let aggregates = stmt
            .query_map([], Self::row_to_aggregate)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(aggregates)
    }

    /// Persisted aggregate for (key, value), if any.
    pub fn get_tag_aggregate(&self, key: &str, value: &str) -> Result<Option<TagAggregate>> {
        let conn = self.lock()?;
        let aggregate = conn
            .query_row(
                "SELECT key, value, count, cost, hourly, monthly
                 FROM tag_aggregates WHERE key = ?1 AND value = ?2",
                params![key, value],
                Self::row_to_aggregate,
            )
            .optional()?;
        Ok(aggregate)
    }

    pub(crate) fn row_to_aggregate(row: &rusqlite::Row) -> rusqlite::Result<TagAggregate> {
        Ok(TagAggregate {
            key: row.get(0)?,
            value: row.get(1)?,
            count: row.get(2)?,
            cost: row.get(3)?,
            hourly: row.get(4)?,
            monthly: row.get(5)?,
        })
    }
}

impl RecordStore for TagCostDatabase {
    fn read_all_records(&self) -> Result<Vec<ResourceRecord>> {
        self.get_all_records()
    }

    fn upsert_record(&self, record: &ResourceRecord) -> Result<()> {
        self.upsert_records(std::slice::from_ref(record)).map(|_| ())
    }
}

impl AggregateSink for TagCostDatabase {
    fn upsert_aggregate(&self, aggregate: &TagAggregate) -> Result<()> {
        self.upsert_tag_aggregate(aggregate)
    }
}
