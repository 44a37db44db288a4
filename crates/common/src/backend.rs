//! The pluggable store contract consumed by storage, the log, and state.
//!
//! A backend is a key/value + query store over `Record`s. Refs are content
//! hashes of the record's canonical data, computed by the backend itself in
//! `create`: payload records dedup to a stable ref, while log entries embed
//! their allocated timestamp and so get a fresh ref per append.

use std::{
    cmp,
    fmt,
};

use async_trait::async_trait;
use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use crate::{
    json::{
        canonical_json,
        cmp_json,
    },
    sha256::Sha256,
};

/// Stable identifier for a stored record: lowercase hex SHA-256 of the
/// record's canonical JSON.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordRef(String);

impl RecordRef {
    /// The ref `data` will be stored under.
    pub fn of(data: &JsonValue) -> anyhow::Result<Self> {
        let canonical = canonical_json(data)?;
        Ok(Self(Sha256::hash(canonical.as_bytes()).as_hex()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RecordRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One stored unit: its ref and the JSON it was created from.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub record_ref: RecordRef,
    pub data: JsonValue,
}

impl Record {
    /// The value a filter or ordering field resolves to. `ref` addresses the
    /// record's own ref; any other name is a top-level field of `data`,
    /// with absent fields treated as null.
    pub fn field(&self, name: &str) -> JsonValue {
        if name == "ref" {
            return JsonValue::String(self.record_ref.as_str().to_owned());
        }
        self.data.get(name).cloned().unwrap_or(JsonValue::Null)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    In,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A `(field, op, value)` predicate over record data.
#[derive(Clone, Debug)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: JsonValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: JsonValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let field_value = record.field(&self.field);
        match self.op {
            FilterOp::Eq => cmp_json(&field_value, &self.value) == cmp::Ordering::Equal,
            FilterOp::In => match &self.value {
                JsonValue::Array(candidates) => candidates
                    .iter()
                    .any(|candidate| cmp_json(&field_value, candidate) == cmp::Ordering::Equal),
                _ => false,
            },
            FilterOp::Gt => cmp_json(&field_value, &self.value) == cmp::Ordering::Greater,
            FilterOp::Ge => cmp_json(&field_value, &self.value) != cmp::Ordering::Less,
            FilterOp::Lt => cmp_json(&field_value, &self.value) == cmp::Ordering::Less,
            FilterOp::Le => cmp_json(&field_value, &self.value) != cmp::Ordering::Greater,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    /// Ascending order, e.g. 1, 2, 3.
    Asc,
    /// Descending order, e.g. 3, 2, 1.
    Desc,
}

/// A `(field, order)` sort specification.
#[derive(Clone, Debug)]
pub struct Ordering {
    pub field: String,
    pub order: Order,
}

impl Ordering {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: Order::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: Order::Desc,
        }
    }

    /// Stable sort, so records comparing equal keep their backend order.
    pub fn sort(&self, records: &mut [Record]) {
        records.sort_by(|a, b| {
            let ordering = cmp_json(&a.field(&self.field), &b.field(&self.field));
            match self.order {
                Order::Asc => ordering,
                Order::Desc => ordering.reverse(),
            }
        });
    }
}

/// Persisted backend descriptor: a registered implementation name plus its
/// settings, stored inside collection metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub backend: String,
    #[serde(default = "empty_settings")]
    pub settings: JsonValue,
}

fn empty_settings() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

impl BackendConfig {
    pub fn new(backend: impl Into<String>, settings: JsonValue) -> Self {
        Self {
            backend: backend.into(),
            settings,
        }
    }
}

/// The store abstraction the engine is built on. Implementations must behave
/// identically modulo durability; the conformance suite in
/// `common::testing::backend_test_suite` pins the contract down.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug + 'static {
    /// Fetch a single record. Missing refs are a `NotFound` error.
    async fn get(&self, record_ref: &RecordRef) -> anyhow::Result<Record>;

    /// Persist `data` under its content ref. Idempotent: identical data maps
    /// to the same ref, and re-creating it returns the existing record.
    async fn create(&self, data: JsonValue) -> anyhow::Result<Record>;

    /// Order-preserving multi-get. Any missing ref fails the whole call.
    async fn bulk_read(&self, refs: &[RecordRef]) -> anyhow::Result<Vec<Record>>;

    /// Records matching every filter, sorted by `order` when given (backend
    /// insertion order otherwise).
    async fn query(
        &self,
        filters: Vec<Filter>,
        order: Option<Ordering>,
    ) -> anyhow::Result<Vec<Record>>;

    /// All records, sorted by `order` when given.
    async fn list(&self, order: Option<Ordering>) -> anyhow::Result<Vec<Record>>;

    /// Refs of all records, in backend insertion order.
    async fn keys(&self) -> anyhow::Result<Vec<RecordRef>>;

    /// Remove a record. Missing refs are a `NotFound` error.
    async fn delete(&self, record_ref: &RecordRef) -> anyhow::Result<()>;

    /// Remove all records.
    async fn clear(&self) -> anyhow::Result<()>;
}

pub fn record_not_found(record_ref: &RecordRef) -> ErrorMetadata {
    ErrorMetadata::not_found(
        "RecordNotFound",
        format!("Record \"{record_ref}\" was not found"),
    )
}
