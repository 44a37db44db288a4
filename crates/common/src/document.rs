//! Document keys, user ids, and the materialized document row.

use std::{
    fmt,
    str::FromStr,
};

use errors::ErrorMetadata;
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
    types::Timestamp,
};

/// External name of a document within one collection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentKey(String);

impl DocumentKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DocumentKey {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !s.is_empty(),
            ErrorMetadata::bad_request("EmptyDocumentKey", "Document keys must be non-empty"),
        );
        Ok(Self(s))
    }
}

impl FromStr for DocumentKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        s.to_owned().try_into()
    }
}

impl From<DocumentKey> for String {
    fn from(key: DocumentKey) -> String {
        key.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of the acting principal, resolved by the surrounding
/// auth system. System-generated log entries carry no user.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the materialized state: the latest version of a live document.
///
/// The persisted row carries only refs and timestamps. `data` is transient:
/// the reducer fills it in when the payload is already in hand, and the read
/// path resolves it through storage otherwise (a deleted-and-recreated state
/// backend therefore never loses payloads, they live in storage).
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub key: DocumentKey,
    pub data: Option<JsonValue>,
    pub data_ref: Option<RecordRef>,
    pub log_ref: RecordRef,
    pub created_on: Timestamp,
    pub modified_on: Timestamp,
}

#[derive(Serialize, Deserialize)]
struct SerializedDocument {
    key: DocumentKey,
    data_ref: Option<RecordRef>,
    log_ref: RecordRef,
    created_on: Timestamp,
    modified_on: Timestamp,
}

impl Document {
    /// The wire form persisted in the state backend. `data` is not included.
    pub fn record_data(&self) -> anyhow::Result<JsonValue> {
        let serialized = SerializedDocument {
            key: self.key.clone(),
            data_ref: self.data_ref.clone(),
            log_ref: self.log_ref.clone(),
            created_on: self.created_on,
            modified_on: self.modified_on,
        };
        Ok(serde_json::to_value(serialized)?)
    }

    pub fn from_record(record: Record) -> anyhow::Result<Self> {
        let serialized: SerializedDocument = serde_json::from_value(record.data)?;
        Ok(Self {
            key: serialized.key,
            data: None,
            data_ref: serialized.data_ref,
            log_ref: serialized.log_ref,
            created_on: serialized.created_on,
            modified_on: serialized.modified_on,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        Document,
        DocumentKey,
    };
    use crate::{
        backend::{
            Record,
            RecordRef,
        },
        types::Timestamp,
    };

    #[test]
    fn test_empty_keys_are_rejected() {
        assert!("".parse::<DocumentKey>().is_err());
        assert!(serde_json::from_value::<DocumentKey>(json!("")).is_err());
        assert!("k".parse::<DocumentKey>().is_ok());
    }

    #[test]
    fn test_row_roundtrip_drops_transient_data() -> anyhow::Result<()> {
        let doc = Document {
            key: "recipes".parse()?,
            data: Some(json!({"cuisine": "basque"})),
            data_ref: Some(RecordRef::of(&json!({"cuisine": "basque"}))?),
            log_ref: RecordRef::of(&json!("entry"))?,
            created_on: Timestamp::must(1),
            modified_on: Timestamp::must(2),
        };
        let data = doc.record_data()?;
        assert!(data.get("data").is_none());
        let loaded = Document::from_record(Record {
            record_ref: RecordRef::of(&data)?,
            data,
        })?;
        assert_eq!(loaded.key, doc.key);
        assert_eq!(loaded.data, None);
        assert_eq!(loaded.data_ref, doc.data_ref);
        assert_eq!(loaded.log_ref, doc.log_ref);
        assert_eq!(loaded.created_on, doc.created_on);
        assert_eq!(loaded.modified_on, doc.modified_on);
        Ok(())
    }
}
