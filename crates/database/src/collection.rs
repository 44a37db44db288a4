//! The collection facade over the storage/log/state triad.
//!
//! `ReadOnlyCollection` replays and reads, `FrozenCollection` adds snapshot
//! writing, and `Collection` adds the mutation API. Every mutation follows
//! the same commit order: validate, write the payload blob, append the log
//! entry (the commit point), fold it into state. A crash between the last
//! two steps is healed by `regenerate`.

use std::{
    collections::BTreeMap,
    ops::Deref,
};

use common::{
    backend::{
        Filter,
        Ordering,
        RecordRef,
    },
    document::{
        Document,
        DocumentKey,
        UserId,
    },
    knobs::REPLAY_BULK_READ_CHUNK_SIZE,
    log_entry::{
        LogEntry,
        Operation,
        OperationParameters,
    },
    types::Timestamp,
};
use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use itertools::Itertools;
use serde_json::Value as JsonValue;

use crate::{
    log::Log,
    metadata::{
        CollectionConfig,
        Permissions,
    },
    patch::{
        self,
        PatchOrTarget,
    },
    schema::SchemaValidator,
    state::{
        ConflictStrategy,
        State,
    },
    storage::Storage,
};

/// A collection surface that only allows reading, used both as the base of
/// the writable variants and for historical states, which are not modifiable.
pub struct ReadOnlyCollection {
    storage: Storage,
    log: Log,
    state: State,
    permissions: Permissions,
    schema: Option<SchemaValidator>,
}

impl ReadOnlyCollection {
    pub fn new(storage: Storage, log: Log, state: State) -> Self {
        Self {
            storage,
            log,
            state,
            permissions: Permissions::new(),
            schema: None,
        }
    }

    /// Instantiate the triad from a stored descriptor. Loading is on-demand
    /// by the caller (a namespace holds descriptors, not live collections),
    /// which is what keeps namespace-in-namespace layouts from recursing.
    pub fn from_config(config: &CollectionConfig) -> anyhow::Result<Self> {
        let storage = Storage::new(db_connection::connect_backend(&config.storage)?);
        let log = Log::new(db_connection::connect_backend(&config.logger)?);
        let state = State::new(db_connection::connect_backend(&config.state)?);
        let schema = config
            .schema
            .as_ref()
            .map(SchemaValidator::load)
            .transpose()?;
        Ok(Self {
            storage,
            log,
            state,
            permissions: config.permissions.clone(),
            schema,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    /// Rebuild state from the log, bootstrapped by the latest snapshot when
    /// one exists. Returns the number of entries replayed after the
    /// snapshot. Idempotent.
    pub async fn regenerate(&self) -> anyhow::Result<usize> {
        // Remove all data otherwise we might have some rogue keys.
        self.state.clear().await?;

        let entries = match self.log.latest_snapshot().await {
            Ok(snapshot) => {
                self.load_snapshot(&snapshot).await?;
                self.log.after(snapshot.modified_on).await?
            },
            Err(e) if e.is_not_found() => self.log.list(Ordering::asc("modified_on")).await?,
            Err(e) => return Err(e),
        };

        let data_refs = entries
            .iter()
            .filter_map(|entry| entry.data_ref.clone())
            .collect();
        let blobs = self.fetch_blobs(data_refs).await?;

        let mut replayed = 0;
        for entry in &entries {
            replayed += 1;
            let data = entry
                .data_ref
                .as_ref()
                .and_then(|data_ref| blobs.get(data_ref).cloned());
            self.state
                .apply(entry, data, ConflictStrategy::Error)
                .await?;
        }
        tracing::info!("Regenerated state by replaying {replayed} log entries");
        Ok(replayed)
    }

    async fn load_snapshot(&self, snapshot: &LogEntry) -> anyhow::Result<()> {
        let listing_ref = snapshot
            .data_ref
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("snapshot entry has no listing blob"))?;
        let listing = self.storage.get(listing_ref).await?;
        let pairs: Vec<(RecordRef, Option<RecordRef>)> = serde_json::from_value(listing.data)?;
        let (log_refs, data_refs): (Vec<RecordRef>, Vec<Option<RecordRef>>) =
            pairs.into_iter().unzip();

        let entries = self.log.bulk_read(&log_refs).await?;
        let blobs = self
            .fetch_blobs(data_refs.iter().flatten().cloned().collect())
            .await?;

        for (entry, data_ref) in entries.iter().zip(data_refs) {
            let data = data_ref.and_then(|data_ref| blobs.get(&data_ref).cloned());
            self.state
                .apply(entry, data, ConflictStrategy::Overwrite)
                .await?;
        }
        tracing::info!(
            "Bootstrapped state from snapshot {} ({} documents)",
            snapshot.record_ref,
            log_refs.len(),
        );
        Ok(())
    }

    async fn fetch_blobs(
        &self,
        refs: Vec<RecordRef>,
    ) -> anyhow::Result<BTreeMap<RecordRef, JsonValue>> {
        let refs: Vec<RecordRef> = refs.into_iter().unique().collect();
        let mut blobs = BTreeMap::new();
        for chunk in refs.chunks(*REPLAY_BULK_READ_CHUNK_SIZE) {
            for record in self.storage.bulk_read(chunk).await? {
                blobs.insert(record.record_ref, record.data);
            }
        }
        Ok(blobs)
    }

    /// Read one document, resolving its payload through storage.
    pub async fn read(&self, key: &DocumentKey) -> anyhow::Result<Document> {
        let mut document = self.state.get(key).await?;
        if document.data.is_none() {
            if let Some(data_ref) = &document.data_ref {
                document.data = Some(self.storage.get(data_ref).await?.data);
            }
        }
        Ok(document)
    }

    /// All live documents. Payloads are left unresolved.
    pub async fn list(&self) -> anyhow::Result<Vec<Document>> {
        self.state.list().await
    }

    pub async fn keys(&self) -> anyhow::Result<Vec<DocumentKey>> {
        self.state.keys().await
    }

    pub async fn select(
        &self,
        filters: Vec<Filter>,
        order: Option<Ordering>,
    ) -> anyhow::Result<Vec<Document>> {
        self.state.select(filters, order).await
    }

    /// Every mutation that ever affected `key`, ascending by timestamp.
    pub async fn history(&self, key: &DocumentKey) -> anyhow::Result<Vec<LogEntry>> {
        self.log.history(key).await
    }
}

/// A read-only collection that can still capture snapshots of its state.
/// Time-traveled instances hold a clamped log, so their `snapshot` fails as
/// a read-only write; instances over a live log (e.g. a snapshot job loaded
/// from a descriptor) succeed.
pub struct FrozenCollection {
    inner: ReadOnlyCollection,
}

impl FrozenCollection {
    pub fn new(storage: Storage, log: Log, state: State) -> Self {
        Self {
            inner: ReadOnlyCollection::new(storage, log, state),
        }
    }

    pub fn from_config(config: &CollectionConfig) -> anyhow::Result<Self> {
        Ok(Self {
            inner: ReadOnlyCollection::from_config(config)?,
        })
    }

    pub async fn snapshot(&self) -> anyhow::Result<LogEntry> {
        write_snapshot(&self.inner).await
    }
}

impl Deref for FrozenCollection {
    type Target = ReadOnlyCollection;

    fn deref(&self) -> &ReadOnlyCollection {
        &self.inner
    }
}

/// The full mutation surface.
pub struct Collection {
    inner: ReadOnlyCollection,
}

impl Deref for Collection {
    type Target = ReadOnlyCollection;

    fn deref(&self) -> &ReadOnlyCollection {
        &self.inner
    }
}

impl Collection {
    pub fn new(storage: Storage, log: Log, state: State) -> Self {
        Self {
            inner: ReadOnlyCollection::new(storage, log, state),
        }
    }

    pub fn from_config(config: &CollectionConfig) -> anyhow::Result<Self> {
        Ok(Self {
            inner: ReadOnlyCollection::from_config(config)?,
        })
    }

    pub fn with_schema(mut self, schema: SchemaValidator) -> Self {
        self.inner.schema = Some(schema);
        self
    }

    pub async fn create(
        &self,
        key: &DocumentKey,
        data: JsonValue,
        user: Option<UserId>,
    ) -> anyhow::Result<Document> {
        if let Some(schema) = &self.inner.schema {
            schema.validate(&data)?;
        }
        self.ensure_absent(key).await?;

        let blob = self.inner.storage.create(data.clone()).await?;
        let entry = self
            .inner
            .log
            .create(
                Some(key.clone()),
                Operation::Create,
                Some(blob.record_ref),
                user,
                None,
                None,
            )
            .await?;
        let document = self
            .inner
            .state
            .apply(&entry, Some(data), ConflictStrategy::Error)
            .await?;
        document.ok_or_else(|| anyhow::anyhow!("create did not produce a document"))
    }

    /// Apply a patch (or diff against a whole replacement document) on top
    /// of the current version. The log records the patch itself.
    pub async fn update(
        &self,
        key: &DocumentKey,
        patch_or_target: PatchOrTarget,
        user: Option<UserId>,
    ) -> anyhow::Result<Document> {
        let previous = self.read(key).await?;
        let previous_data = previous.data.clone().unwrap_or(JsonValue::Null);

        let resolved = patch::resolve_patch(&previous_data, &patch_or_target)?;
        let data = patch::apply_patch(&previous_data, &resolved)?;
        if let Some(schema) = &self.inner.schema {
            schema.validate(&data)?;
        }

        let blob = self.inner.storage.create(data.clone()).await?;
        let entry = self
            .inner
            .log
            .create(
                Some(key.clone()),
                Operation::Update,
                Some(blob.record_ref),
                user,
                Some(previous.log_ref.clone()),
                Some(OperationParameters::Patch {
                    patch: patch::patch_to_value(&resolved)?,
                }),
            )
            .await?;
        let document = self
            .inner
            .state
            .apply(&entry, Some(data), ConflictStrategy::Error)
            .await?;
        document.ok_or_else(|| anyhow::anyhow!("update did not produce a document"))
    }

    /// Replace the whole document. Logged as an update carrying the full
    /// replacement and no patch.
    pub async fn replace(
        &self,
        key: &DocumentKey,
        data: JsonValue,
        user: Option<UserId>,
    ) -> anyhow::Result<Document> {
        let previous = self.inner.state.get(key).await?;
        if let Some(schema) = &self.inner.schema {
            schema.validate(&data)?;
        }

        let blob = self.inner.storage.create(data.clone()).await?;
        let entry = self
            .inner
            .log
            .create(
                Some(key.clone()),
                Operation::Update,
                Some(blob.record_ref),
                user,
                Some(previous.log_ref.clone()),
                None,
            )
            .await?;
        let document = self
            .inner
            .state
            .apply(&entry, Some(data), ConflictStrategy::Error)
            .await?;
        document.ok_or_else(|| anyhow::anyhow!("replace did not produce a document"))
    }

    pub async fn delete(&self, key: &DocumentKey, user: Option<UserId>) -> anyhow::Result<()> {
        // data_ref for delete entries is always null.
        let previous = self.inner.state.get(key).await?;
        let entry = self
            .inner
            .log
            .create(
                Some(key.clone()),
                Operation::Delete,
                None,
                user,
                Some(previous.log_ref),
                None,
            )
            .await?;
        self.inner
            .state
            .apply(&entry, None, ConflictStrategy::Error)
            .await?;
        Ok(())
    }

    /// Move a document to `new_key`: one entry removing the source, one
    /// establishing the destination. The destination is checked before
    /// either entry is written, so an occupied key fails with no log emitted.
    pub async fn rename(
        &self,
        key: &DocumentKey,
        new_key: &DocumentKey,
        user: Option<UserId>,
    ) -> anyhow::Result<Document> {
        let previous = self.read(key).await?;
        self.ensure_absent(new_key).await?;

        let source = self
            .inner
            .log
            .create(
                Some(key.clone()),
                Operation::Rename,
                None,
                user.clone(),
                Some(previous.log_ref.clone()),
                Some(OperationParameters::RenameTo {
                    to: new_key.clone(),
                }),
            )
            .await?;
        self.inner
            .state
            .apply(&source, None, ConflictStrategy::Error)
            .await?;

        let destination = self
            .inner
            .log
            .create(
                Some(new_key.clone()),
                Operation::Rename,
                previous.data_ref.clone(),
                user,
                None,
                Some(OperationParameters::RenameFrom { from: key.clone() }),
            )
            .await?;
        let document = self
            .inner
            .state
            .apply(&destination, previous.data, ConflictStrategy::Error)
            .await?;
        document.ok_or_else(|| anyhow::anyhow!("rename did not produce a document"))
    }

    /// Capture the live state as a snapshot entry, bounding future replays.
    pub async fn snapshot(&self) -> anyhow::Result<LogEntry> {
        write_snapshot(&self.inner).await
    }

    /// A read-only collection bound to this one's history at `timestamp`,
    /// materialized into `state` (which should be empty).
    /// Note: the closer the timestamp is to a snapshot the faster this is.
    pub async fn at_time(
        &self,
        timestamp: Timestamp,
        state: State,
        regenerate: bool,
    ) -> anyhow::Result<FrozenCollection> {
        let mut inner = ReadOnlyCollection::new(
            self.inner.storage.clone(),
            self.inner.log.at_time(timestamp),
            state,
        );
        // No need to carry the schema, read-only collections have no use
        // for it.
        inner.permissions = self.inner.permissions.clone();
        let frozen = FrozenCollection { inner };
        if regenerate {
            frozen.regenerate().await?;
        }
        Ok(frozen)
    }

    async fn ensure_absent(&self, key: &DocumentKey) -> anyhow::Result<()> {
        match self.inner.state.get(key).await {
            Ok(_) => Err(ErrorMetadata::key_exists(
                "DocumentExists",
                format!("Document \"{key}\" already exists"),
            )
            .into()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

async fn write_snapshot(collection: &ReadOnlyCollection) -> anyhow::Result<LogEntry> {
    let documents = collection.state.list().await?;
    let pairs: Vec<(RecordRef, Option<RecordRef>)> = documents
        .iter()
        .map(|doc| (doc.log_ref.clone(), doc.data_ref.clone()))
        .collect();
    let listing = collection
        .storage
        .create(serde_json::to_value(pairs)?)
        .await?;
    let entry = collection.log.create_snapshot(listing.record_ref).await?;
    tracing::info!(
        "Snapshot {} captures {} documents",
        entry.record_ref,
        documents.len(),
    );
    Ok(entry)
}
