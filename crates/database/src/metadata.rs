//! The persisted collection descriptor.
//!
//! A namespace stores one of these per collection (itself as a document in a
//! collections collection). The descriptor names the three backends of the
//! triad, the access bitmask per principal selector, and the optional schema.
//! Construction from a descriptor is how collections are (lazily) loaded, so
//! the shape is validated strictly: unknown attributes are a bad request.

use std::{
    collections::BTreeMap,
    fmt,
    ops::{
        BitAnd,
        BitOr,
    },
};

use common::backend::BackendConfig;
use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::schema::SchemaConfig;

/// Access bitmask granted to a principal selector.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u8);

impl Permission {
    pub const ADMIN: Permission = Permission(4);
    pub const NONE: Permission = Permission(0);
    pub const READ: Permission = Permission(1);
    pub const WRITE: Permission = Permission(2);

    pub fn contains(&self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        Permission(self.0 | rhs.0)
    }
}

impl BitAnd for Permission {
    type Output = Permission;

    fn bitand(self, rhs: Permission) -> Permission {
        Permission(self.0 & rhs.0)
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Permission::READ) {
            names.push("READ");
        }
        if self.contains(Permission::WRITE) {
            names.push("WRITE");
        }
        if self.contains(Permission::ADMIN) {
            names.push("ADMIN");
        }
        if names.is_empty() {
            names.push("NONE");
        }
        write!(f, "Permission({})", names.join("|"))
    }
}

/// Mapping from principal/role selector to its permission bits.
pub type Permissions = BTreeMap<String, Permission>;

/// A collection's unique id: 32 lowercase hex digits.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionId(String);

impl CollectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CollectionId {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        anyhow::ensure!(
            s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()),
            ErrorMetadata::bad_request(
                "InvalidCollectionId",
                format!("Collection id \"{s}\" is not 32 hex digits"),
            ),
        );
        Ok(Self(s))
    }
}

impl From<CollectionId> for String {
    fn from(id: CollectionId) -> String {
        id.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The full descriptor stored in the parent namespace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionConfig {
    pub uuid: CollectionId,
    pub permissions: Permissions,
    pub logger: BackendConfig,
    pub storage: BackendConfig,
    pub state: BackendConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaConfig>,
}

impl CollectionConfig {
    pub fn new(logger: BackendConfig, storage: BackendConfig, state: BackendConfig) -> Self {
        Self {
            uuid: CollectionId::generate(),
            permissions: Permissions::new(),
            logger,
            storage,
            state,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: SchemaConfig) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Parse a descriptor document, rejecting unknown attributes.
    pub fn parse(value: JsonValue) -> anyhow::Result<Self> {
        serde_json::from_value(value).map_err(|e| {
            ErrorMetadata::bad_request(
                "BadCollectionConfig",
                format!("Malformed collection descriptor: {e}"),
            )
            .into()
        })
    }

    pub fn to_value(&self) -> anyhow::Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}
