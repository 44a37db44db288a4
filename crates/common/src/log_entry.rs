//! The append-only log's entry type and its wire form.

use std::fmt;

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use crate::{
    backend::{
        Record,
        RecordRef,
    },
    document::{
        DocumentKey,
        UserId,
    },
    types::Timestamp,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Rename,
    Snapshot,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Rename => "rename",
            Operation::Snapshot => "snapshot",
        };
        write!(f, "{name}")
    }
}

/// Operation-specific payload carried alongside a log entry. On the wire this
/// is the free-form dict `{"patch": [...]}`, `{"to": key}` or
/// `{"from": key}`; the variants' field names are the wire keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationParameters {
    /// RFC 6902 patch that produced an update's post-state.
    Patch { patch: JsonValue },
    /// Source side of a rename: the key the document moved to.
    RenameTo { to: DocumentKey },
    /// Destination side of a rename: the key the document came from.
    RenameFrom { from: DocumentKey },
}

/// One record of the append-only log.
///
/// `record_ref` is the backing record's content ref. The remaining fields are
/// the wire form: since `modified_on` is unique within a log, every entry
/// hashes to a distinct ref.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub record_ref: RecordRef,
    /// The document this entry affects; none for snapshot entries.
    pub key: Option<DocumentKey>,
    pub operation: Operation,
    /// Ref of the post-state payload blob (or the snapshot listing). None
    /// for deletes and the source side of renames.
    pub data_ref: Option<RecordRef>,
    /// None for system-generated entries.
    pub user: Option<UserId>,
    pub modified_on: Timestamp,
    /// Ref of the prior entry affecting the same key; none on create.
    pub previous: Option<RecordRef>,
    pub operation_parameters: Option<OperationParameters>,
}

#[derive(Serialize, Deserialize)]
struct SerializedLogEntry {
    key: Option<DocumentKey>,
    operation: Operation,
    data_ref: Option<RecordRef>,
    user: Option<UserId>,
    modified_on: Timestamp,
    previous: Option<RecordRef>,
    operation_parameters: Option<OperationParameters>,
}

impl LogEntry {
    /// Build the wire form persisted as the backing record's data. The
    /// entry's own ref is derived from exactly this form by the backend.
    pub fn record_data(
        key: Option<DocumentKey>,
        operation: Operation,
        data_ref: Option<RecordRef>,
        user: Option<UserId>,
        modified_on: Timestamp,
        previous: Option<RecordRef>,
        operation_parameters: Option<OperationParameters>,
    ) -> anyhow::Result<JsonValue> {
        let serialized = SerializedLogEntry {
            key,
            operation,
            data_ref,
            user,
            modified_on,
            previous,
            operation_parameters,
        };
        Ok(serde_json::to_value(serialized)?)
    }

    pub fn from_record(record: Record) -> anyhow::Result<Self> {
        let serialized: SerializedLogEntry = serde_json::from_value(record.data)?;
        Ok(Self {
            record_ref: record.record_ref,
            key: serialized.key,
            operation: serialized.operation,
            data_ref: serialized.data_ref,
            user: serialized.user,
            modified_on: serialized.modified_on,
            previous: serialized.previous,
            operation_parameters: serialized.operation_parameters,
        })
    }

    pub fn is_snapshot(&self) -> bool {
        self.operation == Operation::Snapshot
    }

    /// The rename destination recorded on a source-side entry.
    pub fn rename_to(&self) -> Option<&DocumentKey> {
        match &self.operation_parameters {
            Some(OperationParameters::RenameTo { to }) => Some(to),
            _ => None,
        }
    }

    /// The rename source recorded on a destination-side entry.
    pub fn rename_from(&self) -> Option<&DocumentKey> {
        match &self.operation_parameters {
            Some(OperationParameters::RenameFrom { from }) => Some(from),
            _ => None,
        }
    }
}
