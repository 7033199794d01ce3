//! Durable event execution log.
//!
//! One row per dispatched event: name, payload snapshot, originating
//! extension, outcome, duration. Append-only; rows are never mutated
//! after insert and are removed only by the retention job.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use portico_core::bus::{ExecutionLogSink, PublishReport};
use portico_core::Event;

use crate::error::Result;

// Keys are "<zero-padded millis>:<event id>" so iteration order is
// chronological and retention can prune by key prefix comparison.
const EVENT_LOG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("event_log");

/// One dispatched event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogRecord {
    pub id: String,
    pub event_name: String,
    pub payload: serde_json::Value,
    /// Extension (or host component) that published the event, if known.
    pub source: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub handlers_executed: usize,
    pub duration_ms: u64,
    /// Creation timestamp (unix millis).
    pub created_at: i64,
}

impl EventLogRecord {
    /// Build a record from a dispatched event and its publish report.
    pub fn from_dispatch(event: &Event, report: &PublishReport) -> Self {
        let error = if report.errors.is_empty() {
            None
        } else {
            Some(
                report
                    .errors
                    .iter()
                    .map(|failure| format!("{}: {}", failure.handler, failure.error))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        Self {
            id: event.id.clone(),
            event_name: event.name.clone(),
            payload: event.payload.clone(),
            source: event.source().map(str::to_string),
            success: report.success(),
            error,
            handlers_executed: report.handlers_executed,
            duration_ms: report.duration_ms,
            created_at: event.created_at,
        }
    }

    fn key(&self) -> String {
        format!("{:020}:{}", self.created_at, self.id)
    }
}

/// Append-only store for dispatched events.
pub struct EventLogStore {
    db: Arc<Database>,
}

impl EventLogStore {
    /// Open (or create) the event log database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(EVENT_LOG_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Append one record.
    pub fn append(&self, record: &EventLogRecord) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EVENT_LOG_TABLE)?;
            let value = serde_json::to_vec(record)?;
            table.insert(record.key().as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// The most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<EventLogRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EVENT_LOG_TABLE)?;

        let mut records = Vec::new();
        for item in table.iter()?.rev() {
            if records.len() >= limit {
                break;
            }
            let (_, value) = item?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }

    /// Total number of records.
    pub fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EVENT_LOG_TABLE)?;
        let mut count = 0;
        for item in table.iter()? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Retention job: delete records created before the cutoff (unix
    /// millis). Returns the number of rows removed.
    pub fn prune_older_than(&self, cutoff_millis: i64) -> Result<usize> {
        let boundary = format!("{:020}:", cutoff_millis);

        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(EVENT_LOG_TABLE)?;
            let keys: Vec<String> = {
                let mut keys = Vec::new();
                for item in table.iter()? {
                    let (key, _) = item?;
                    let key = key.value().to_string();
                    if key.as_str() < boundary.as_str() {
                        keys.push(key);
                    } else {
                        break;
                    }
                }
                keys
            };
            for key in &keys {
                table.remove(key.as_str())?;
            }
            keys.len()
        };
        write_txn.commit()?;
        if removed > 0 {
            tracing::debug!(removed, "pruned event log entries");
        }
        Ok(removed)
    }
}

impl ExecutionLogSink for EventLogStore {
    fn record(&self, event: &Event, report: &PublishReport) -> anyhow::Result<()> {
        let record = EventLogRecord::from_dispatch(event, report);
        self.append(&record)?;
        Ok(())
    }
}
