//! Maps persisted backend descriptors to live backend instances.
//!
//! Descriptors name an implementation from a closed registry plus its
//! settings, so the set of constructible backends is a type-checked match
//! rather than a runtime plugin table.

use std::sync::Arc;

use common::backend::{
    Backend,
    BackendConfig,
};
use errors::ErrorMetadata;
use memory::MemoryBackend;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlite::SqliteBackend;

pub const MEMORY: &str = "memory";
pub const SQLITE: &str = "sqlite";

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MemorySettings {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SqliteSettings {
    path: String,
}

pub fn connect_backend(config: &BackendConfig) -> anyhow::Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config.backend.as_str() {
        MEMORY => {
            let _: MemorySettings = parse_settings(MEMORY, &config.settings)?;
            Arc::new(MemoryBackend::new())
        },
        SQLITE => {
            let settings: SqliteSettings = parse_settings(SQLITE, &config.settings)?;
            let backend = SqliteBackend::new(&settings.path)?;
            tracing::info!("Connected to SQLite at {}", settings.path);
            Arc::new(backend)
        },
        unknown => {
            return Err(ErrorMetadata::bad_request(
                "UnknownBackend",
                format!("Backend \"{unknown}\" is not registered"),
            )
            .into())
        },
    };
    Ok(backend)
}

fn parse_settings<T: for<'a> Deserialize<'a>>(
    name: &str,
    settings: &JsonValue,
) -> anyhow::Result<T> {
    T::deserialize(settings).map_err(|e| {
        ErrorMetadata::bad_request(
            "InvalidBackendSettings",
            format!("Invalid settings for backend \"{name}\": {e}"),
        )
        .into()
    })
}
