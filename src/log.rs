//! Fact log collaborator contract and the built-in in-memory backend.
//!
//! The log is the arbiter of write concurrency: its uniqueness constraint
//! on `(stream_id, version)` decides which of two racing writers wins.
//! The core performs no locking or retries of its own.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::entry::{FactEntry, NewFactEntry};
use crate::error::StorageError;

/// Failure inserting a fact row.
#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    /// Another writer already claimed this version for the stream.
    /// Reported, not fatal: the caller retries with a fresh stream
    /// instance to observe the committed state.
    #[error("version {version} already recorded for stream `{stream_id}`")]
    VersionRace {
        /// Stream whose version was contested.
        stream_id: String,
        /// The version both writers computed.
        version: u64,
    },

    /// The backend failed for an unrelated reason.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Append-only store of fact rows.
///
/// # Contract
///
/// - `insert` must enforce `(stream_id, version)` uniqueness atomically
///   and assign `recorded_at` at insert time; `occurred_at` defaults to
///   `recorded_at` when the proposed row carries none.
/// - `query` must return rows with `recorded_at <= recorded_before`,
///   ordered by `occurred_at` (the fold order), not insertion order.
pub trait FactLog: Send + Sync {
    /// Insert a row, enforcing the version uniqueness constraint.
    ///
    /// # Errors
    ///
    /// [`InsertError::VersionRace`] when `(stream_id, version)` is
    /// already taken; [`InsertError::Storage`] for backend failures.
    fn insert(&self, entry: NewFactEntry) -> Result<FactEntry, InsertError>;

    /// All rows of a stream known at `recorded_before`, ordered by
    /// `occurred_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be read.
    fn query(
        &self,
        stream_id: &str,
        recorded_before: DateTime<Utc>,
    ) -> Result<Vec<FactEntry>, StorageError>;
}

/// In-memory reference implementation of [`FactLog`].
///
/// Backs the crate's tests and demonstrates the contract above. A host
/// application substitutes its own database-backed
/// implementation in production.
#[derive(Debug, Default)]
pub struct InMemoryFactLog {
    rows: Mutex<Vec<FactEntry>>,
    // Test clock: when set, insert stamps this instead of `Utc::now()`.
    frozen_now: Mutex<Option<DateTime<Utc>>>,
}

impl InMemoryFactLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the recording clock to `now` for subsequent inserts. Used by
    /// bitemporal tests to record facts "in the past".
    pub fn freeze_recording_time(&self, now: DateTime<Utc>) {
        *self.frozen_now.lock().expect("clock lock poisoned") = Some(now);
    }

    /// Release a pinned recording clock.
    pub fn unfreeze_recording_time(&self) {
        *self.frozen_now.lock().expect("clock lock poisoned") = None;
    }

    /// Total number of rows across all streams.
    pub fn row_count(&self) -> usize {
        self.rows.lock().expect("log lock poisoned").len()
    }

    fn now(&self) -> DateTime<Utc> {
        self.frozen_now
            .lock()
            .expect("clock lock poisoned")
            .unwrap_or_else(Utc::now)
    }
}

impl FactLog for InMemoryFactLog {
    fn insert(&self, entry: NewFactEntry) -> Result<FactEntry, InsertError> {
        let mut rows = self.rows.lock().expect("log lock poisoned");

        // Uniqueness constraint on (stream_id, version).
        if rows
            .iter()
            .any(|row| row.stream_id == entry.stream_id && row.version == entry.version)
        {
            return Err(InsertError::VersionRace {
                stream_id: entry.stream_id,
                version: entry.version,
            });
        }

        let recorded_at = self.now();
        let row = FactEntry {
            kind: entry.kind,
            stream_id: entry.stream_id,
            version: entry.version,
            payload: entry.payload,
            meta: entry.meta,
            recorded_at,
            occurred_at: entry.occurred_at.unwrap_or(recorded_at),
        };
        rows.push(row.clone());
        Ok(row)
    }

    fn query(
        &self,
        stream_id: &str,
        recorded_before: DateTime<Utc>,
    ) -> Result<Vec<FactEntry>, StorageError> {
        let rows = self.rows.lock().expect("log lock poisoned");
        let mut matched: Vec<FactEntry> = rows
            .iter()
            .filter(|row| row.stream_id == stream_id && row.recorded_at <= recorded_before)
            .cloned()
            .collect();
        // Fold order is the validity-time axis; version breaks ties
        // deterministically.
        matched.sort_by_key(|row| (row.occurred_at, row.version));
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn proposed(stream_id: &str, version: u64, occurred_at: Option<DateTime<Utc>>) -> NewFactEntry {
        NewFactEntry {
            kind: "debt.issued".to_string(),
            stream_id: stream_id.to_string(),
            version,
            payload: json!({ "value": 100.0 }),
            meta: None,
            occurred_at,
        }
    }

    #[test]
    fn insert_assigns_recording_time() {
        let log = InMemoryFactLog::new();
        let before = Utc::now();

        let row = log.insert(proposed("debt-1", 1, None)).unwrap();

        assert!(row.recorded_at >= before);
        assert_eq!(row.occurred_at, row.recorded_at);
    }

    #[test]
    fn insert_keeps_supplied_occurred_at() {
        let log = InMemoryFactLog::new();
        let feb_15 = Utc.with_ymd_and_hms(2025, 2, 15, 0, 0, 0).unwrap();

        let row = log.insert(proposed("debt-1", 1, Some(feb_15))).unwrap();

        assert_eq!(row.occurred_at, feb_15);
        assert_ne!(row.recorded_at, row.occurred_at);
    }

    #[test]
    fn duplicate_version_is_a_race() {
        let log = InMemoryFactLog::new();
        log.insert(proposed("debt-1", 1, None)).unwrap();

        let err = log.insert(proposed("debt-1", 1, None)).unwrap_err();
        assert!(matches!(
            err,
            InsertError::VersionRace { version: 1, .. }
        ));
        assert_eq!(log.row_count(), 1);
    }

    #[test]
    fn same_version_on_different_streams_is_allowed() {
        let log = InMemoryFactLog::new();
        log.insert(proposed("debt-1", 1, None)).unwrap();
        log.insert(proposed("debt-2", 1, None)).unwrap();

        assert_eq!(log.row_count(), 2);
    }

    #[test]
    fn query_orders_by_occurred_at_not_insertion() {
        let log = InMemoryFactLog::new();
        let jan_1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let feb_15 = Utc.with_ymd_and_hms(2025, 2, 15, 0, 0, 0).unwrap();
        let mar_10 = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();

        // Retroactive correction: the Feb 15 fact is recorded last.
        log.insert(proposed("debt-1", 1, Some(jan_1))).unwrap();
        log.insert(proposed("debt-1", 2, Some(mar_10))).unwrap();
        log.insert(proposed("debt-1", 3, Some(feb_15))).unwrap();

        let rows = log.query("debt-1", Utc::now()).unwrap();
        let occurred: Vec<DateTime<Utc>> = rows.iter().map(|r| r.occurred_at).collect();
        assert_eq!(occurred, vec![jan_1, feb_15, mar_10]);
    }

    #[test]
    fn query_bounds_the_knowledge_axis() {
        let log = InMemoryFactLog::new();
        let jan_1 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let mar_15 = Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap();

        log.freeze_recording_time(jan_1);
        log.insert(proposed("debt-1", 1, None)).unwrap();
        log.freeze_recording_time(mar_15);
        log.insert(proposed("debt-1", 2, None)).unwrap();

        let as_of_mar_1 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let rows = log.query("debt-1", as_of_mar_1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, 1);
    }

    #[test]
    fn query_filters_by_stream() {
        let log = InMemoryFactLog::new();
        log.insert(proposed("debt-1", 1, None)).unwrap();
        log.insert(proposed("debt-2", 1, None)).unwrap();

        let rows = log.query("debt-1", Utc::now()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stream_id, "debt-1");
    }
}
