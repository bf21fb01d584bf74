//! SQLite-backed event and summary tables
//!
//! Schema:
//! - `events`        one row per storage item, keyed by ingestion key
//! - `summary`       one row per (domain_md5, datepath) holding the rolling ttl
//! - `summary_slots` one row per (domain_md5, datepath, minute) hit counter
//!
//! Counter increments run as a single transaction using
//! `ON CONFLICT DO UPDATE SET hits = hits + excluded.hits`, so concurrent
//! increments never lose updates.

use super::backend::{EventStore, StoreError};
use crate::collector_core::record::StorageItem;
use crate::collector_core::summary::{SummaryCounter, SummaryIncrement, SummaryKey};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    ingest_key  TEXT PRIMARY KEY,
    domain_md5  TEXT NOT NULL,
    ttm         INTEGER NOT NULL,
    ttl         INTEGER NOT NULL,
    item        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_domain_ttm ON events(domain_md5, ttm);
CREATE INDEX IF NOT EXISTS idx_events_ttl ON events(ttl);

CREATE TABLE IF NOT EXISTS summary (
    domain_md5  TEXT NOT NULL,
    datepath    TEXT NOT NULL,
    ttl         INTEGER NOT NULL,
    PRIMARY KEY (domain_md5, datepath)
);
CREATE INDEX IF NOT EXISTS idx_summary_ttl ON summary(ttl);

CREATE TABLE IF NOT EXISTS summary_slots (
    domain_md5  TEXT NOT NULL,
    datepath    TEXT NOT NULL,
    slot        TEXT NOT NULL,
    hits        INTEGER NOT NULL,
    PRIMARY KEY (domain_md5, datepath, slot)
);
"#;

/// Event store on a single SQLite connection.
///
/// Blocking SQLite work runs on the blocking thread pool so request deadlines
/// can still fire while a write is in flight.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and ensure the schema.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Io(std::io::Error::new(
                        e.kind(),
                        format!("Failed to create database directory {}: {}", parent.display(), e),
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Wrap an already-open connection (e.g. `Connection::open_in_memory`).
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        apply_optimized_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;

        log::info!("✅ SQLite event store initialized with WAL mode");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` inside one transaction on the blocking pool.
    ///
    /// With a deadline, the transaction is committed only if the deadline has
    /// not passed once the lock is held and `op` has finished; otherwise it is
    /// rolled back and the call fails with [`StoreError::DeadlineExceeded`].
    /// The blocking task is always awaited, so the result reports what the
    /// database actually holds.
    async fn run<T, F>(&self, deadline: Option<Instant>, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError> + Send + 'static,
    {
        let deadline = deadline.map(Instant::into_std);
        let expired = move || deadline.is_some_and(|d| std::time::Instant::now() >= d);
        if expired() {
            return Err(StoreError::DeadlineExceeded);
        }

        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))?;
            if expired() {
                return Err(StoreError::DeadlineExceeded);
            }

            let tx = guard.transaction()?;
            let value = op(&tx)?;
            if expired() {
                tx.rollback()?;
                return Err(StoreError::DeadlineExceeded);
            }
            tx.commit()?;
            Ok(value)
        })
        .await?
    }
}

struct EventRow {
    ingest_key: String,
    domain_md5: String,
    ttm: i64,
    ttl: i64,
    item: String,
}

impl EventRow {
    fn from_item(item: &StorageItem) -> Result<Self, StoreError> {
        let domain_md5 = item
            .domain_md5()
            .ok_or_else(|| StoreError::Rejected("item has no domain_md5".to_string()))?;
        let ttm = item
            .ttm()
            .ok_or_else(|| StoreError::Rejected("item has no ttm".to_string()))?;
        let ttl = item
            .ttl()
            .ok_or_else(|| StoreError::Rejected("item has no ttl".to_string()))?;

        Ok(Self {
            ingest_key: item.ingest_key()?,
            domain_md5: domain_md5.to_string(),
            ttm,
            ttl,
            item: serde_json::to_string(item)?,
        })
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn batch_put(&self, items: &[StorageItem], deadline: Instant) -> Result<(), StoreError> {
        let rows = items
            .iter()
            .map(EventRow::from_item)
            .collect::<Result<Vec<_>, _>>()?;
        let count = rows.len();

        self.run(Some(deadline), move |tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO events (ingest_key, domain_md5, ttm, ttl, item)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for row in &rows {
                stmt.execute(params![row.ingest_key, row.domain_md5, row.ttm, row.ttl, row.item])?;
            }
            Ok(())
        })
        .await?;

        log::debug!("✅ Flushed {} events to SQLite", count);
        Ok(())
    }

    async fn increment_counter(&self, increment: &SummaryIncrement, deadline: Instant) -> Result<(), StoreError> {
        let increment = increment.clone();

        self.run(Some(deadline), move |tx| {
            tx.execute(
                "INSERT INTO summary (domain_md5, datepath, ttl) VALUES (?1, ?2, ?3)
                 ON CONFLICT(domain_md5, datepath) DO UPDATE SET ttl = excluded.ttl",
                params![increment.key.domain_md5, increment.key.datepath, increment.ttl],
            )?;
            tx.execute(
                "INSERT INTO summary_slots (domain_md5, datepath, slot, hits) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(domain_md5, datepath, slot) DO UPDATE SET hits = hits + excluded.hits",
                params![
                    increment.key.domain_md5,
                    increment.key.datepath,
                    increment.slot,
                    increment.hits
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn scan_summary(&self) -> Result<Vec<SummaryCounter>, StoreError> {
        self.run(None, |tx| {
            let mut stmt = tx.prepare(
                "SELECT s.domain_md5, s.datepath, s.ttl, c.slot, c.hits
                 FROM summary s
                 LEFT JOIN summary_slots c
                   ON c.domain_md5 = s.domain_md5 AND c.datepath = s.datepath
                 ORDER BY s.domain_md5, s.datepath, c.slot",
            )?;

            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })?;

            let mut counters: Vec<SummaryCounter> = Vec::new();
            for row in rows {
                let (domain_md5, datepath, ttl, slot, hits) = row?;
                let key = SummaryKey { domain_md5, datepath };

                let is_new = counters.last().map_or(true, |c| c.key != key);
                if is_new {
                    counters.push(SummaryCounter::new(key, ttl));
                }
                if let (Some(slot), Some(hits), Some(counter)) = (slot, hits, counters.last_mut()) {
                    counter.slots.insert(slot, hits);
                }
            }

            Ok(counters)
        })
        .await
    }

    async fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        self.run(None, move |tx| {
            let events = tx.execute("DELETE FROM events WHERE ttl <= ?1", params![now])?;
            let slots = tx.execute(
                "DELETE FROM summary_slots WHERE EXISTS (
                     SELECT 1 FROM summary s
                     WHERE s.domain_md5 = summary_slots.domain_md5
                       AND s.datepath = summary_slots.datepath
                       AND s.ttl <= ?1
                 )",
                params![now],
            )?;
            let summaries = tx.execute("DELETE FROM summary WHERE ttl <= ?1", params![now])?;

            if events + summaries > 0 {
                log::info!(
                    "🧹 Purged {} expired events, {} summary items ({} slots)",
                    events,
                    summaries,
                    slots
                );
            }
            Ok(events + summaries)
        })
        .await
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
