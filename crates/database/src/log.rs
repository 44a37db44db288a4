//! The append-only log: every mutation becomes one entry here, keyed by a
//! strictly increasing timestamp and indexed by document key.
//!
//! Replay of this log is the authoritative definition of state, so appends
//! enforce two invariants: timestamps never repeat or regress within one log,
//! and a supplied `previous` pointer must still name the latest entry for its
//! key. Historical views produced by `at_time` clamp every query to the
//! cutoff and refuse writes.

use std::sync::Arc;

use common::{
    backend::{
        Backend,
        Filter,
        FilterOp,
        Ordering,
        Record,
        RecordRef,
    },
    document::{
        DocumentKey,
        UserId,
    },
    log_entry::{
        LogEntry,
        Operation,
        OperationParameters,
    },
    types::Timestamp,
};
use errors::ErrorMetadata;
use parking_lot::Mutex;
use serde_json::json;

use crate::wrap_backend_error;

#[derive(Clone)]
pub struct Log {
    backend: Arc<dyn Backend>,
    // Highest timestamp handed out by this handle, lazily seeded from the
    // highest persisted entry.
    last_allocated: Arc<Mutex<Option<Timestamp>>>,
    // Present on historical views: queries see `modified_on <= cutoff` only.
    cutoff: Option<Timestamp>,
}

impl Log {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            last_allocated: Arc::new(Mutex::new(None)),
            cutoff: None,
        }
    }

    /// A read-only view of this log clamped to `modified_on <= timestamp`.
    pub fn at_time(&self, timestamp: Timestamp) -> Log {
        let cutoff = match self.cutoff {
            Some(existing) => existing.min(timestamp),
            None => timestamp,
        };
        Log {
            backend: self.backend.clone(),
            last_allocated: self.last_allocated.clone(),
            cutoff: Some(cutoff),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.cutoff.is_some()
    }

    /// Append one entry. `previous`, when supplied, must be the latest entry
    /// for `key` or the append fails with a conflict and writes nothing.
    pub async fn create(
        &self,
        key: Option<DocumentKey>,
        operation: Operation,
        data_ref: Option<RecordRef>,
        user: Option<UserId>,
        previous: Option<RecordRef>,
        operation_parameters: Option<OperationParameters>,
    ) -> anyhow::Result<LogEntry> {
        anyhow::ensure!(
            self.cutoff.is_none(),
            ErrorMetadata::bad_request("ReadOnlyLog", "Historical log views do not accept writes"),
        );
        if let (Some(key), Some(previous)) = (&key, &previous) {
            let latest = self.latest_entry(key).await?;
            let current = latest.as_ref().map(|entry| &entry.record_ref);
            if current != Some(previous) {
                return Err(ErrorMetadata::conflict(
                    "StalePrevious",
                    format!(
                        "Entry \"{previous}\" is no longer the latest log entry for \"{key}\""
                    ),
                )
                .into());
            }
        }
        let modified_on = self.allocate_timestamp().await?;
        let data = LogEntry::record_data(
            key,
            operation,
            data_ref,
            user,
            modified_on,
            previous,
            operation_parameters,
        )?;
        let record = self
            .backend
            .create(data)
            .await
            .map_err(wrap_backend_error)?;
        LogEntry::from_record(record)
    }

    /// Append a system snapshot entry pointing at the state listing blob.
    pub async fn create_snapshot(&self, data_ref: RecordRef) -> anyhow::Result<LogEntry> {
        self.create(None, Operation::Snapshot, Some(data_ref), None, None, None)
            .await
    }

    /// All entries affecting `key`, ascending by timestamp.
    pub async fn history(&self, key: &DocumentKey) -> anyhow::Result<Vec<LogEntry>> {
        let mut filters = vec![Filter::new("key", FilterOp::Eq, json!(key.as_str()))];
        filters.extend(self.cutoff_filter());
        let records = self
            .backend
            .query(filters, Some(Ordering::asc("modified_on")))
            .await
            .map_err(wrap_backend_error)?;
        entries_from(records)
    }

    pub async fn list(&self, order: Ordering) -> anyhow::Result<Vec<LogEntry>> {
        let records = self
            .backend
            .query(self.cutoff_filter(), Some(order))
            .await
            .map_err(wrap_backend_error)?;
        entries_from(records)
    }

    /// Entries with `modified_on > timestamp`, ascending.
    pub async fn after(&self, timestamp: Timestamp) -> anyhow::Result<Vec<LogEntry>> {
        let mut filters = vec![Filter::new(
            "modified_on",
            FilterOp::Gt,
            json!(u64::from(timestamp)),
        )];
        filters.extend(self.cutoff_filter());
        let records = self
            .backend
            .query(filters, Some(Ordering::asc("modified_on")))
            .await
            .map_err(wrap_backend_error)?;
        entries_from(records)
    }

    /// The most recent snapshot entry, or NotFound if none was ever taken.
    pub async fn latest_snapshot(&self) -> anyhow::Result<LogEntry> {
        let mut filters = vec![Filter::new(
            "operation",
            FilterOp::Eq,
            serde_json::to_value(Operation::Snapshot)?,
        )];
        filters.extend(self.cutoff_filter());
        let records = self
            .backend
            .query(filters, Some(Ordering::desc("modified_on")))
            .await
            .map_err(wrap_backend_error)?;
        match records.into_iter().next() {
            Some(record) => LogEntry::from_record(record),
            None => Err(ErrorMetadata::not_found(
                "SnapshotNotFound",
                "No snapshot entry exists in this log",
            )
            .into()),
        }
    }

    /// Order-preserving multi-get by entry ref.
    pub async fn bulk_read(&self, refs: &[RecordRef]) -> anyhow::Result<Vec<LogEntry>> {
        let records = self
            .backend
            .bulk_read(refs)
            .await
            .map_err(wrap_backend_error)?;
        entries_from(records)
    }

    async fn latest_entry(&self, key: &DocumentKey) -> anyhow::Result<Option<LogEntry>> {
        let mut filters = vec![Filter::new("key", FilterOp::Eq, json!(key.as_str()))];
        filters.extend(self.cutoff_filter());
        let records = self
            .backend
            .query(filters, Some(Ordering::desc("modified_on")))
            .await
            .map_err(wrap_backend_error)?;
        records.into_iter().next().map(LogEntry::from_record).transpose()
    }

    fn cutoff_filter(&self) -> Vec<Filter> {
        self.cutoff
            .map(|cutoff| Filter::new("modified_on", FilterOp::Le, json!(u64::from(cutoff))))
            .into_iter()
            .collect()
    }

    async fn allocate_timestamp(&self) -> anyhow::Result<Timestamp> {
        // Seed from the backend once so a reopened log resumes above
        // everything already persisted. Seeding happens outside the lock.
        if self.last_allocated.lock().is_none() {
            let seed = self.max_persisted_timestamp().await?;
            let mut guard = self.last_allocated.lock();
            if guard.is_none() {
                *guard = Some(seed);
            }
        }
        let now = Timestamp::wall_clock();
        let mut guard = self.last_allocated.lock();
        let last = guard.unwrap_or(Timestamp::MIN);
        // If the wall clock repeats or regresses, bump by the smallest
        // representable increment instead.
        let allocated = if now > last { now } else { last.succ()? };
        *guard = Some(allocated);
        Ok(allocated)
    }

    async fn max_persisted_timestamp(&self) -> anyhow::Result<Timestamp> {
        let records = self
            .backend
            .query(vec![], Some(Ordering::desc("modified_on")))
            .await
            .map_err(wrap_backend_error)?;
        match records.into_iter().next() {
            Some(record) => Ok(LogEntry::from_record(record)?.modified_on),
            None => Ok(Timestamp::MIN),
        }
    }
}

fn entries_from(records: Vec<Record>) -> anyhow::Result<Vec<LogEntry>> {
    records.into_iter().map(LogEntry::from_record).collect()
}
