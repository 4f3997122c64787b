//! Storage layer for heatshare.
//!
//! Persists everything the allocation engine needs across restarts using
//! `rusqlite`: the last presentation values used for restore, the
//! configuration overlay written by `hs set`, the resumable sample state and a
//! ledger of every distribution round.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Only one process writes at a time; the binary enforces this with a lock file.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond precision
//! and a `Z` suffix (e.g., `2026-01-15T06:00:00.000Z`), so lexicographic
//! ordering matches chronological ordering.
//!
//! ## Value Storage
//!
//! `last_values.value` is stored as text exactly as written, so a malformed
//! value can be detected and skipped on restore instead of being coerced.
//! `options.value` holds one JSON-encoded field of the configuration overlay.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use hs_core::{ConfigUpdate, ConsumerId, Distribution, LastValueSource, RestoreKey, SampleState};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use thiserror::Error;

const OPTIONS_REVISION_KEY: &str = "options_revision";

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp in {column}: {timestamp}")]
    TimestampParse {
        column: &'static str,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored option does not match the configuration schema.
    #[error("invalid option {key}: {source}")]
    InvalidOption {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// The options overlay could not be encoded or decoded.
    #[error("options JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// A stored row refers to an invalid consumer reference.
    #[error("invalid consumer reference in {table}: {value:?}")]
    InvalidConsumer { table: &'static str, value: String },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// Everything written after one tick, committed in a single transaction.
#[derive(Debug, Clone, Copy)]
pub struct TickRecord<'a> {
    pub recorded_at: DateTime<Utc>,
    pub state: &'a SampleState,
    /// Every configured consumer with its effort window. Persisted values of
    /// consumers not listed here are dropped.
    pub efforts: &'a [(ConsumerId, f64)],
    pub last_values: &'a [(RestoreKey, f64)],
    pub distribution: Option<&'a Distribution>,
}

/// A persisted presentation value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastValueRecord {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

/// One distribution round from the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionRecord {
    pub id: i64,
    pub distributed_at: DateTime<Utc>,
    pub delta: f64,
    pub distributable: f64,
    pub shared_load_deducted: f64,
    pub split: String,
    /// Per-consumer amounts ordered by consumer reference.
    pub allocations: Vec<(String, f64)>,
}

impl DistributionRecord {
    pub fn allocated(&self) -> f64 {
        self.allocations.iter().map(|(_, amount)| amount).sum()
    }
}

/// Sums over the whole distribution ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LedgerSummary {
    pub rounds: i64,
    pub total_delta: f64,
    pub total_shared_load_deducted: f64,
    pub total_allocated: f64,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            -- Last values captured from the engine after each tick.
            -- key: restore key (e.g., 'allocated:climate.office')
            CREATE TABLE IF NOT EXISTS last_values (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Configuration overlay; value is JSON for one field.
            CREATE TABLE IF NOT EXISTS options (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sample_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_sample_time TEXT,
                last_meter_reading REAL,
                last_delta REAL NOT NULL DEFAULT 0,
                last_distributable REAL NOT NULL DEFAULT 0,
                last_shared_load_deducted REAL NOT NULL DEFAULT 0,
                last_distribution_time TEXT
            );

            CREATE TABLE IF NOT EXISTS effort_windows (
                consumer_id TEXT PRIMARY KEY,
                effort REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS distributions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                distributed_at TEXT NOT NULL,
                delta REAL NOT NULL,
                distributable REAL NOT NULL,
                shared_load_deducted REAL NOT NULL,
                split TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_distributions_at ON distributions(distributed_at);

            CREATE TABLE IF NOT EXISTS allocations (
                distribution_id INTEGER NOT NULL,
                consumer_id TEXT NOT NULL,
                amount REAL NOT NULL,
                PRIMARY KEY (distribution_id, consumer_id),
                FOREIGN KEY (distribution_id) REFERENCES distributions(id) ON DELETE CASCADE
            );
            ",
        )?;
        Ok(())
    }

    /// Returns the raw persisted value for a restore key.
    pub fn last_value(&self, key: &str) -> Result<Option<String>, DbError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM last_values WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Lists all persisted values ordered by key.
    pub fn list_last_values(&self) -> Result<Vec<LastValueRecord>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, updated_at FROM last_values ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(LastValueRecord {
                key: row.get(0)?,
                value: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row?);
        }
        Ok(values)
    }

    /// Upserts raw values for restore keys.
    pub fn save_last_values(
        &mut self,
        values: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO last_values (key, value, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                ",
            )?;
            let updated_at = format_timestamp(now);
            for (key, value) in values {
                stmt.execute(params![key, value, updated_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Drops the persisted per-consumer values of `consumers`.
    ///
    /// A consumer added again later starts from zero instead of being
    /// restored. Returns the number of values removed.
    pub fn forget_consumers(&mut self, consumers: &[ConsumerId]) -> Result<usize, DbError> {
        if consumers.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let forgotten = forget_consumer_values(&tx, |id| consumers.contains(id))?;
        tx.execute(
            &format!(
                "DELETE FROM effort_windows WHERE consumer_id IN ({})",
                vec!["?"; consumers.len()].join(", ")
            ),
            rusqlite::params_from_iter(consumers.iter().map(ConsumerId::as_str)),
        )?;
        tx.commit()?;
        Ok(forgotten)
    }

    /// Loads the configuration overlay.
    ///
    /// Unknown keys are ignored; a known key with a value of the wrong shape
    /// is an error naming that key.
    pub fn load_options(&self) -> Result<ConfigUpdate, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM options ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut fields = Map::new();
        for row in rows {
            let (key, raw) = row?;
            let value: Value = serde_json::from_str(&raw)
                .map_err(|source| DbError::InvalidOption {
                    key: key.clone(),
                    source,
                })?;
            // Validate each field on its own so errors name the offending key.
            let single = Value::Object(Map::from_iter([(key.clone(), value.clone())]));
            serde_json::from_value::<ConfigUpdate>(single)
                .map_err(|source| DbError::InvalidOption {
                    key: key.clone(),
                    source,
                })?;
            fields.insert(key, value);
        }

        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    /// Writes every field set in `update` to the overlay and bumps the
    /// options revision.
    pub fn set_options(
        &mut self,
        update: &ConfigUpdate,
        now: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        let Value::Object(fields) = serde_json::to_value(update)? else {
            return self.options_revision();
        };

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO options (key, value, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                ",
            )?;
            let updated_at = format_timestamp(now);
            for (key, value) in &fields {
                stmt.execute(params![key, value.to_string(), updated_at])?;
            }
        }
        tx.execute(
            "
            INSERT INTO meta (key, value) VALUES (?, 1)
            ON CONFLICT(key) DO UPDATE SET value = value + 1
            ",
            [OPTIONS_REVISION_KEY],
        )?;
        tx.commit()?;

        tracing::debug!(fields = fields.len(), "updated options overlay");
        self.options_revision()
    }

    /// Monotonic counter bumped by every [`Database::set_options`] call.
    pub fn options_revision(&self) -> Result<i64, DbError> {
        let revision = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?",
                [OPTIONS_REVISION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(revision.unwrap_or(0))
    }

    /// Loads the resumable sample state, if a tick was ever saved.
    pub fn load_sample_state(&self) -> Result<Option<SampleState>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT last_sample_time, last_meter_reading, last_delta, last_distributable,
                       last_shared_load_deducted, last_distribution_time
                FROM sample_state WHERE id = 1
                ",
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((sample_time, reading, delta, distributable, deducted, distribution_time)) = row
        else {
            return Ok(None);
        };
        Ok(Some(SampleState {
            last_sample_time: sample_time
                .map(|t| parse_timestamp(&t, "sample_state.last_sample_time"))
                .transpose()?,
            last_meter_reading: reading,
            last_delta: delta,
            last_distributable: distributable,
            last_shared_load_deducted: deducted,
            last_distribution_time: distribution_time
                .map(|t| parse_timestamp(&t, "sample_state.last_distribution_time"))
                .transpose()?,
        }))
    }

    /// Loads the effort windows saved with the sample state.
    pub fn load_effort_windows(&self) -> Result<Vec<(ConsumerId, f64)>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT consumer_id, effort FROM effort_windows ORDER BY consumer_id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut efforts = Vec::new();
        for row in rows {
            let (consumer, effort) = row?;
            let id = ConsumerId::new(consumer.clone()).map_err(|_| DbError::InvalidConsumer {
                table: "effort_windows",
                value: consumer,
            })?;
            efforts.push((id, effort));
        }
        Ok(efforts)
    }

    /// Forgets the saved meter baseline so the next tick re-seeds it.
    ///
    /// Used when the meter reference changes between runs.
    pub fn clear_meter_baseline(&mut self) -> Result<(), DbError> {
        self.conn
            .execute("UPDATE sample_state SET last_meter_reading = NULL WHERE id = 1", [])?;
        Ok(())
    }

    /// Persists the outcome of one tick atomically.
    ///
    /// Returns the ledger ID of the distribution round, if one ran.
    pub fn save_tick(&mut self, record: &TickRecord<'_>) -> Result<Option<i64>, DbError> {
        let tx = self.conn.transaction()?;
        let updated_at = format_timestamp(record.recorded_at);

        let state = record.state;
        tx.execute(
            "
            INSERT INTO sample_state (
                id, last_sample_time, last_meter_reading, last_delta, last_distributable,
                last_shared_load_deducted, last_distribution_time
            ) VALUES (1, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                last_sample_time = excluded.last_sample_time,
                last_meter_reading = excluded.last_meter_reading,
                last_delta = excluded.last_delta,
                last_distributable = excluded.last_distributable,
                last_shared_load_deducted = excluded.last_shared_load_deducted,
                last_distribution_time = excluded.last_distribution_time
            ",
            params![
                state.last_sample_time.map(format_timestamp),
                state.last_meter_reading,
                state.last_delta,
                state.last_distributable,
                state.last_shared_load_deducted,
                state.last_distribution_time.map(format_timestamp),
            ],
        )?;

        tx.execute("DELETE FROM effort_windows", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO effort_windows (consumer_id, effort) VALUES (?, ?)")?;
            for (consumer, effort) in record.efforts {
                stmt.execute(params![consumer.as_str(), effort])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO last_values (key, value, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                ",
            )?;
            for (key, value) in record.last_values {
                stmt.execute(params![key.to_string(), value.to_string(), updated_at])?;
            }
        }
        let configured: HashSet<&ConsumerId> = record.efforts.iter().map(|(id, _)| id).collect();
        let forgotten = forget_consumer_values(&tx, |id| !configured.contains(id))?;
        if forgotten > 0 {
            tracing::debug!(forgotten, "dropped values of removed consumers");
        }

        let distribution_id = match record.distribution {
            Some(distribution) => {
                tx.execute(
                    "
                    INSERT INTO distributions
                    (distributed_at, delta, distributable, shared_load_deducted, split)
                    VALUES (?, ?, ?, ?, ?)
                    ",
                    params![
                        updated_at,
                        distribution.delta,
                        distribution.distributable,
                        distribution.shared_load_deducted,
                        distribution.split.as_str(),
                    ],
                )?;
                let id = tx.last_insert_rowid();
                let mut stmt = tx.prepare(
                    "INSERT INTO allocations (distribution_id, consumer_id, amount) VALUES (?, ?, ?)",
                )?;
                for allocation in &distribution.allocations {
                    stmt.execute(params![id, allocation.consumer.as_str(), allocation.amount])?;
                }
                Some(id)
            }
            None => None,
        };

        tx.commit()?;
        Ok(distribution_id)
    }

    /// Lists the most recent distribution rounds, newest first.
    pub fn recent_distributions(&self, limit: usize) -> Result<Vec<DistributionRecord>, DbError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "
            SELECT id, distributed_at, delta, distributable, shared_load_deducted, split
            FROM distributions
            ORDER BY id DESC
            LIMIT ?
            ",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, distributed_at, delta, distributable, shared_load_deducted, split) = row?;
            records.push(DistributionRecord {
                id,
                distributed_at: parse_timestamp(&distributed_at, "distributions.distributed_at")?,
                delta,
                distributable,
                shared_load_deducted,
                split,
                allocations: self.allocations_for(id)?,
            });
        }
        Ok(records)
    }

    fn allocations_for(&self, distribution_id: i64) -> Result<Vec<(String, f64)>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT consumer_id, amount FROM allocations
            WHERE distribution_id = ?
            ORDER BY consumer_id ASC
            ",
        )?;
        let rows = stmt.query_map([distribution_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut allocations = Vec::new();
        for row in rows {
            allocations.push(row?);
        }
        Ok(allocations)
    }

    /// Totals over every recorded distribution round.
    pub fn ledger_summary(&self) -> Result<LedgerSummary, DbError> {
        let (rounds, total_delta, total_shared_load_deducted) = self.conn.query_row(
            "
            SELECT COUNT(*), COALESCE(SUM(delta), 0.0), COALESCE(SUM(shared_load_deducted), 0.0)
            FROM distributions
            ",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            },
        )?;
        let total_allocated: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0.0) FROM allocations",
            [],
            |row| row.get(0),
        )?;
        Ok(LedgerSummary {
            rounds,
            total_delta,
            total_shared_load_deducted,
            total_allocated,
        })
    }
}

impl LastValueSource for Database {
    fn load_last_value(&self, key: &str) -> Option<String> {
        match self.last_value(key) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to load persisted value");
                None
            }
        }
    }
}

fn parse_timestamp(timestamp: &str, column: &'static str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            column,
            timestamp: timestamp.to_string(),
            source,
        })
}

/// Deletes per-consumer `last_values` rows whose consumer matches `forget`.
///
/// Keys that do not parse as a restore key are left alone.
fn forget_consumer_values<F>(conn: &Connection, forget: F) -> Result<usize, DbError>
where
    F: Fn(&ConsumerId) -> bool,
{
    let keys: Vec<String> = {
        let mut stmt = conn.prepare("SELECT key FROM last_values")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<_, _>>()?
    };

    let mut forgotten = 0;
    let mut delete = conn.prepare("DELETE FROM last_values WHERE key = ?")?;
    for key in keys {
        let owned_by_forgotten = key
            .parse::<RestoreKey>()
            .ok()
            .is_some_and(|parsed| parsed.consumer().is_some_and(&forget));
        if owned_by_forgotten {
            forgotten += delete.execute([key.as_str()])?;
        }
    }
    Ok(forgotten)
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
