//! The materialized key -> document view.
//!
//! State is a cache of the log: `apply` is the deterministic reducer that
//! folds one entry into the view, and replaying a log through it always
//! produces the same rows regardless of wall clock or scheduling. Rows store
//! refs only; payloads stay in storage and are resolved lazily on read.

use std::sync::Arc;

use common::{
    backend::{
        Backend,
        Filter,
        FilterOp,
        Ordering,
        Record,
    },
    document::{
        Document,
        DocumentKey,
    },
    log_entry::{
        LogEntry,
        Operation,
    },
};
use errors::ErrorMetadata;
use serde_json::{
    json,
    Value as JsonValue,
};

use crate::wrap_backend_error;

/// How `apply` treats each operation's transition preconditions.
///
/// `Error` enforces them (a create against a live key fails, an update
/// against a missing key fails). `Overwrite` skips them; snapshot loading
/// uses it because the snapshot already encodes a consistent state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConflictStrategy {
    Error,
    Overwrite,
}

#[derive(Clone)]
pub struct State {
    backend: Arc<dyn Backend>,
}

impl State {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn get(&self, key: &DocumentKey) -> anyhow::Result<Document> {
        match self.get_record(key).await? {
            Some(record) => Document::from_record(record),
            None => Err(document_not_found(key).into()),
        }
    }

    pub async fn list(&self) -> anyhow::Result<Vec<Document>> {
        let records = self
            .backend
            .list(None)
            .await
            .map_err(wrap_backend_error)?;
        records.into_iter().map(Document::from_record).collect()
    }

    pub async fn keys(&self) -> anyhow::Result<Vec<DocumentKey>> {
        Ok(self.list().await?.into_iter().map(|doc| doc.key).collect())
    }

    /// Filtered enumeration straight off the backing store.
    pub async fn select(
        &self,
        filters: Vec<Filter>,
        order: Option<Ordering>,
    ) -> anyhow::Result<Vec<Document>> {
        let records = self
            .backend
            .query(filters, order)
            .await
            .map_err(wrap_backend_error)?;
        records.into_iter().map(Document::from_record).collect()
    }

    /// Remove every row. Regeneration starts here so no rogue keys survive a
    /// replay.
    pub async fn clear(&self) -> anyhow::Result<()> {
        self.backend.clear().await.map_err(wrap_backend_error)
    }

    /// Fold one log entry into the view, returning the resulting document
    /// (None for deletes, rename sources, and snapshots). `data` is the
    /// post-state payload when the caller already has it in hand.
    pub async fn apply(
        &self,
        entry: &LogEntry,
        data: Option<JsonValue>,
        conflict_strategy: ConflictStrategy,
    ) -> anyhow::Result<Option<Document>> {
        match entry.operation {
            Operation::Snapshot => Ok(None),
            Operation::Create => Ok(Some(self.insert(entry, data, conflict_strategy).await?)),
            Operation::Update => Ok(Some(self.update(entry, data, conflict_strategy).await?)),
            Operation::Delete => {
                self.remove(entry, conflict_strategy).await?;
                Ok(None)
            },
            Operation::Rename => {
                // The destination side carries the payload ref; the source
                // side carries none and behaves like a delete.
                if entry.data_ref.is_some() {
                    Ok(Some(self.insert(entry, data, conflict_strategy).await?))
                } else {
                    self.remove(entry, conflict_strategy).await?;
                    Ok(None)
                }
            },
        }
    }

    async fn insert(
        &self,
        entry: &LogEntry,
        data: Option<JsonValue>,
        conflict_strategy: ConflictStrategy,
    ) -> anyhow::Result<Document> {
        let key = entry_key(entry)?;
        if let Some(existing) = self.get_record(&key).await? {
            match conflict_strategy {
                ConflictStrategy::Error => {
                    return Err(ErrorMetadata::key_exists(
                        "DocumentExists",
                        format!("Document \"{key}\" already exists"),
                    )
                    .into())
                },
                ConflictStrategy::Overwrite => {
                    self.backend
                        .delete(&existing.record_ref)
                        .await
                        .map_err(wrap_backend_error)?;
                },
            }
        }
        let document = Document {
            key,
            data,
            data_ref: entry.data_ref.clone(),
            log_ref: entry.record_ref.clone(),
            created_on: entry.modified_on,
            modified_on: entry.modified_on,
        };
        self.persist(&document).await?;
        Ok(document)
    }

    async fn update(
        &self,
        entry: &LogEntry,
        data: Option<JsonValue>,
        conflict_strategy: ConflictStrategy,
    ) -> anyhow::Result<Document> {
        let key = entry_key(entry)?;
        let created_on = match self.get_record(&key).await? {
            Some(existing) => {
                let previous = Document::from_record(existing.clone())?;
                self.backend
                    .delete(&existing.record_ref)
                    .await
                    .map_err(wrap_backend_error)?;
                previous.created_on
            },
            None => match conflict_strategy {
                ConflictStrategy::Error => return Err(document_not_found(&key).into()),
                // Snapshot loads replay the latest entry per key, which may
                // be an update; it then also establishes the row.
                ConflictStrategy::Overwrite => entry.modified_on,
            },
        };
        let document = Document {
            key,
            data,
            data_ref: entry.data_ref.clone(),
            log_ref: entry.record_ref.clone(),
            created_on,
            modified_on: entry.modified_on,
        };
        self.persist(&document).await?;
        Ok(document)
    }

    async fn remove(
        &self,
        entry: &LogEntry,
        conflict_strategy: ConflictStrategy,
    ) -> anyhow::Result<()> {
        let key = entry_key(entry)?;
        match self.get_record(&key).await? {
            Some(existing) => self
                .backend
                .delete(&existing.record_ref)
                .await
                .map_err(wrap_backend_error),
            None => match conflict_strategy {
                ConflictStrategy::Error => Err(document_not_found(&key).into()),
                ConflictStrategy::Overwrite => Ok(()),
            },
        }
    }

    async fn persist(&self, document: &Document) -> anyhow::Result<()> {
        self.backend
            .create(document.record_data()?)
            .await
            .map_err(wrap_backend_error)?;
        Ok(())
    }

    async fn get_record(&self, key: &DocumentKey) -> anyhow::Result<Option<Record>> {
        let records = self
            .backend
            .query(
                vec![Filter::new("key", FilterOp::Eq, json!(key.as_str()))],
                None,
            )
            .await
            .map_err(wrap_backend_error)?;
        Ok(records.into_iter().next())
    }
}

fn entry_key(entry: &LogEntry) -> anyhow::Result<DocumentKey> {
    entry
        .key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("{} log entry has no document key", entry.operation))
}

fn document_not_found(key: &DocumentKey) -> ErrorMetadata {
    ErrorMetadata::not_found(
        "DocumentNotFound",
        format!("Document \"{key}\" was not found"),
    )
}
