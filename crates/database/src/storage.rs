//! Content-addressed blob store.
//!
//! Blobs are immutable: a payload's ref is the hash of its canonical form,
//! identical payloads dedup to one record, and nothing here ever rewrites a
//! stored value. Log entries and snapshots reference blobs by ref.

use std::sync::Arc;

use common::backend::{
    Backend,
    Record,
    RecordRef,
};
use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use serde_json::Value as JsonValue;

use crate::wrap_backend_error;

#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn Backend>,
}

impl Storage {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Store `data`, returning its blob. Identical data always maps to the
    /// same ref, so re-creating an existing payload is a no-op.
    pub async fn create(&self, data: JsonValue) -> anyhow::Result<Record> {
        self.backend.create(data).await.map_err(wrap_backend_error)
    }

    pub async fn get(&self, record_ref: &RecordRef) -> anyhow::Result<Record> {
        self.backend
            .get(record_ref)
            .await
            .map_err(wrap_backend_error)
            .map_err(|e| {
                e.map_error_metadata(|em| {
                    if em.is_not_found() {
                        ErrorMetadata::not_found(
                            "BlobNotFound",
                            format!("Blob \"{record_ref}\" was not found"),
                        )
                    } else {
                        em
                    }
                })
            })
    }

    /// Order-preserving multi-get; a single missing blob fails the call.
    pub async fn bulk_read(&self, refs: &[RecordRef]) -> anyhow::Result<Vec<Record>> {
        self.backend
            .bulk_read(refs)
            .await
            .map_err(wrap_backend_error)
    }
}
