//! End-to-end flows through the collection facade.

use std::sync::Arc;

use common::{
    backend::BackendConfig,
    log_entry::Operation,
};
use errors::ErrorMetadataAnyhowExt;
use serde_json::json;

use super::{
    clone_with_fresh_state,
    fresh_state,
    key,
    memory_collection,
};
use crate::{
    metadata::CollectionConfig,
    patch::PatchOrTarget,
    schema::{
        SchemaConfig,
        SchemaValidator,
    },
    Collection,
    FrozenCollection,
    Log,
    State,
    Storage,
};

#[tokio::test]
async fn test_create_rename_then_regenerate_elsewhere() -> anyhow::Result<()> {
    let collection = memory_collection();
    collection.create(&key("key"), json!("value"), None).await?;
    collection
        .create(&key("value"), json!({"keee": "eeeeee"}), None)
        .await?;
    collection
        .rename(&key("value"), &key("otherkey"), None)
        .await?;

    let clone = clone_with_fresh_state(&collection);
    clone.regenerate().await?;

    assert_eq!(clone.read(&key("key")).await?.data, Some(json!("value")));
    assert_eq!(
        clone.read(&key("otherkey")).await?.data,
        Some(json!({"keee": "eeeeee"})),
    );
    assert_eq!(
        clone.read(&key("key")).await?.data,
        collection.read(&key("key")).await?.data,
    );
    Ok(())
}

#[tokio::test]
async fn test_snapshot_bounds_replay() -> anyhow::Result<()> {
    let collection = memory_collection();
    collection.create(&key("k1"), json!({"n": 1}), None).await?;
    collection.snapshot().await?;
    collection.create(&key("k2"), json!({"n": 2}), None).await?;

    let replayed = collection.regenerate().await?;
    // Only the post-snapshot entry replays.
    assert_eq!(replayed, 1);
    let mut keys = collection.keys().await?;
    keys.sort();
    assert_eq!(keys, vec![key("k1"), key("k2")]);
    assert_eq!(collection.read(&key("k1")).await?.data, Some(json!({"n": 1})));
    Ok(())
}

#[tokio::test]
async fn test_patch_update_history_and_time_travel() -> anyhow::Result<()> {
    let collection = memory_collection();
    let created = collection.create(&key("k"), json!({"a": 1}), None).await?;
    collection
        .update(
            &key("k"),
            PatchOrTarget::Patch(json!([{"op": "replace", "path": "/a", "value": 2}])),
            None,
        )
        .await?;
    assert_eq!(collection.read(&key("k")).await?.data, Some(json!({"a": 2})));

    let history = collection.history(&key("k")).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].operation, Operation::Create);
    assert_eq!(history[1].operation, Operation::Update);
    assert!(history[0].modified_on < history[1].modified_on);

    let before_update = collection
        .at_time(created.modified_on, fresh_state(), true)
        .await?;
    assert_eq!(
        before_update.read(&key("k")).await?.data,
        Some(json!({"a": 1})),
    );
    Ok(())
}

#[tokio::test]
async fn test_update_with_target_document_diffs() -> anyhow::Result<()> {
    let collection = memory_collection();
    collection
        .create(&key("k"), json!({"a": 1, "b": "keep"}), None)
        .await?;
    collection
        .update(
            &key("k"),
            PatchOrTarget::Target(json!({"a": 2, "b": "keep"})),
            None,
        )
        .await?;
    assert_eq!(
        collection.read(&key("k")).await?.data,
        Some(json!({"a": 2, "b": "keep"})),
    );
    // The log records the structural diff.
    let history = collection.history(&key("k")).await?;
    let patch = history[1]
        .operation_parameters
        .as_ref()
        .expect("update logs its patch");
    assert!(matches!(
        patch,
        common::log_entry::OperationParameters::Patch { .. },
    ));
    Ok(())
}

#[tokio::test]
async fn test_replace_logs_no_patch() -> anyhow::Result<()> {
    let collection = memory_collection();
    collection.create(&key("k"), json!({"a": 1}), None).await?;
    collection
        .replace(&key("k"), json!({"entirely": "new"}), None)
        .await?;
    assert_eq!(
        collection.read(&key("k")).await?.data,
        Some(json!({"entirely": "new"})),
    );
    let history = collection.history(&key("k")).await?;
    assert_eq!(history[1].operation, Operation::Update);
    assert!(history[1].operation_parameters.is_none());
    Ok(())
}

#[tokio::test]
async fn test_delete_keeps_history() -> anyhow::Result<()> {
    let collection = memory_collection();
    collection.create(&key("k"), json!({"a": 1}), None).await?;
    collection.delete(&key("k"), None).await?;

    let err = collection.read(&key("k")).await.unwrap_err();
    assert!(err.is_not_found(), "{err:?}");

    let operations: Vec<Operation> = collection
        .history(&key("k"))
        .await?
        .into_iter()
        .map(|entry| entry.operation)
        .collect();
    assert_eq!(operations, vec![Operation::Create, Operation::Delete]);

    // The key is free again.
    collection.create(&key("k"), json!({"a": 2}), None).await?;
    assert_eq!(collection.read(&key("k")).await?.data, Some(json!({"a": 2})));
    Ok(())
}

#[tokio::test]
async fn test_double_create_is_key_exists() -> anyhow::Result<()> {
    let collection = memory_collection();
    collection.create(&key("k"), json!(1), None).await?;
    let err = collection
        .create(&key("k"), json!(2), None)
        .await
        .unwrap_err();
    assert!(err.is_key_exists(), "{err:?}");

    // Exactly one create entry was logged.
    let history = collection.history(&key("k")).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operation, Operation::Create);
    assert_eq!(collection.read(&key("k")).await?.data, Some(json!(1)));
    Ok(())
}

#[tokio::test]
async fn test_failed_patch_test_leaves_everything_unchanged() -> anyhow::Result<()> {
    let collection = memory_collection();
    collection.create(&key("k"), json!({"a": 1}), None).await?;
    let err = collection
        .update(
            &key("k"),
            PatchOrTarget::Patch(json!([
                {"op": "test", "path": "/a", "value": 999},
                {"op": "replace", "path": "/a", "value": 2},
            ])),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_patch_test_failed(), "{err:?}");

    assert_eq!(collection.history(&key("k")).await?.len(), 1);
    assert_eq!(collection.read(&key("k")).await?.data, Some(json!({"a": 1})));
    Ok(())
}

#[tokio::test]
async fn test_rename_semantics() -> anyhow::Result<()> {
    let collection = memory_collection();
    let original = collection.create(&key("a"), json!({"x": 7}), None).await?;
    let moved = collection.rename(&key("a"), &key("b"), None).await?;

    let err = collection.read(&key("a")).await.unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
    assert_eq!(moved.data, Some(json!({"x": 7})));
    assert_eq!(moved.data_ref, original.data_ref);
    assert_eq!(collection.read(&key("b")).await?.data, Some(json!({"x": 7})));

    let b_history = collection.history(&key("b")).await?;
    assert_eq!(b_history.len(), 1);
    assert_eq!(b_history[0].operation, Operation::Rename);
    assert_eq!(b_history[0].rename_from(), Some(&key("a")));
    assert_eq!(b_history[0].data_ref, original.data_ref);

    let a_history = collection.history(&key("a")).await?;
    assert_eq!(a_history.len(), 2);
    assert_eq!(a_history[1].rename_to(), Some(&key("b")));
    assert!(a_history[1].data_ref.is_none());
    Ok(())
}

#[tokio::test]
async fn test_rename_into_occupied_key_writes_no_log() -> anyhow::Result<()> {
    let collection = memory_collection();
    collection.create(&key("a"), json!(1), None).await?;
    collection.create(&key("b"), json!(2), None).await?;

    let err = collection
        .rename(&key("a"), &key("b"), None)
        .await
        .unwrap_err();
    assert!(err.is_key_exists(), "{err:?}");

    // The occupied destination was detected before any entry was emitted.
    assert_eq!(collection.history(&key("a")).await?.len(), 1);
    assert_eq!(collection.history(&key("b")).await?.len(), 1);
    assert_eq!(collection.read(&key("a")).await?.data, Some(json!(1)));
    assert_eq!(collection.read(&key("b")).await?.data, Some(json!(2)));
    Ok(())
}

#[tokio::test]
async fn test_schema_rejects_before_any_write() -> anyhow::Result<()> {
    let schema = SchemaValidator::load(&SchemaConfig::json_schema(json!({
        "type": "object",
        "required": ["x"],
    })))?;
    let collection = memory_collection().with_schema(schema);

    let err = collection
        .create(&key("k"), json!({}), None)
        .await
        .unwrap_err();
    assert!(err.is_schema_violation(), "{err:?}");
    assert!(collection.keys().await?.is_empty());
    assert!(collection.history(&key("k")).await?.is_empty());

    // Valid documents pass, invalid updates are rejected too.
    collection.create(&key("k"), json!({"x": 1}), None).await?;
    let err = collection
        .update(
            &key("k"),
            PatchOrTarget::Patch(json!([{"op": "remove", "path": "/x"}])),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_schema_violation(), "{err:?}");
    assert_eq!(collection.history(&key("k")).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_regenerate_heals_a_missed_state_apply() -> anyhow::Result<()> {
    let collection = memory_collection();
    let created = collection.create(&key("k"), json!({"a": 1}), None).await?;

    // A delete that reached the log but never made it into state, as a
    // cancellation between the two steps would leave it.
    collection
        .log()
        .create(
            Some(key("k")),
            Operation::Delete,
            None,
            None,
            Some(created.log_ref.clone()),
            None,
        )
        .await?;
    assert_eq!(collection.read(&key("k")).await?.data, Some(json!({"a": 1})));

    collection.regenerate().await?;
    let err = collection.read(&key("k")).await.unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn test_time_travel_views_refuse_snapshots() -> anyhow::Result<()> {
    let collection = memory_collection();
    let created = collection.create(&key("k"), json!(1), None).await?;
    collection.delete(&key("k"), None).await?;

    let frozen = collection
        .at_time(created.modified_on, fresh_state(), true)
        .await?;
    assert_eq!(frozen.read(&key("k")).await?.data, Some(json!(1)));
    let err = frozen.snapshot().await.unwrap_err();
    assert!(err.is_bad_request(), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn test_frozen_collection_over_live_log_snapshots() -> anyhow::Result<()> {
    let collection = memory_collection();
    collection.create(&key("k"), json!({"a": 1}), None).await?;

    // A snapshot job: a frozen handle over the same triad.
    let frozen = FrozenCollection::new(
        collection.storage().clone(),
        collection.log().clone(),
        collection.state().clone(),
    );
    let entry = frozen.snapshot().await?;
    assert!(entry.is_snapshot());
    assert_eq!(collection.log().latest_snapshot().await?, entry);
    Ok(())
}

#[tokio::test]
async fn test_at_time_between_entries() -> anyhow::Result<()> {
    let collection = memory_collection();
    let created = collection.create(&key("k"), json!({"v": 1}), None).await?;
    let updated = collection
        .replace(&key("k"), json!({"v": 2}), None)
        .await?;

    // Any instant from one entry up to (but excluding) the next observes
    // that entry's state.
    let t = created.modified_on;
    let between = updated.modified_on.pred()?;
    for instant in [t, between] {
        let view = collection.at_time(instant, fresh_state(), true).await?;
        assert_eq!(view.read(&key("k")).await?.data, Some(json!({"v": 1})));
    }
    let at_update = collection
        .at_time(updated.modified_on, fresh_state(), true)
        .await?;
    assert_eq!(at_update.read(&key("k")).await?.data, Some(json!({"v": 2})));

    // Before the first entry the collection was empty.
    let empty = collection
        .at_time(t.pred()?, fresh_state(), true)
        .await?;
    assert!(empty.keys().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_sqlite_triad_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let sqlite_config = |name: &str| {
        BackendConfig::new(
            "sqlite",
            json!({"path": dir.path().join(name).to_string_lossy()}),
        )
    };
    let config = CollectionConfig::new(
        sqlite_config("log.db"),
        sqlite_config("storage.db"),
        sqlite_config("state.db"),
    );

    {
        let collection = Collection::from_config(&config)?;
        collection.create(&key("k"), json!({"a": 1}), None).await?;
        collection
            .update(
                &key("k"),
                PatchOrTarget::Patch(json!([{"op": "replace", "path": "/a", "value": 2}])),
                None,
            )
            .await?;
        collection.snapshot().await?;
        collection.create(&key("later"), json!(true), None).await?;
    }

    // A new process: reopen from the descriptor and replay.
    let collection = Collection::from_config(&config)?;
    let replayed = collection.regenerate().await?;
    assert_eq!(replayed, 1);
    assert_eq!(collection.read(&key("k")).await?.data, Some(json!({"a": 2})));
    assert_eq!(collection.read(&key("later")).await?.data, Some(json!(true)));
    assert_eq!(collection.history(&key("k")).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_collection_from_config_enforces_schema() -> anyhow::Result<()> {
    let memory = || BackendConfig::new("memory", json!({}));
    let config = CollectionConfig::new(memory(), memory(), memory()).with_schema(
        SchemaConfig::json_schema(json!({"type": "object", "required": ["x"]})),
    );
    let collection = Collection::from_config(&config)?;
    let err = collection
        .create(&key("k"), json!({"y": 1}), None)
        .await
        .unwrap_err();
    assert!(err.is_schema_violation(), "{err:?}");
    collection.create(&key("k"), json!({"x": 1}), None).await?;
    Ok(())
}

#[tokio::test]
async fn test_reads_resolve_payloads_lazily() -> anyhow::Result<()> {
    let collection = memory_collection();
    collection.create(&key("k"), json!({"big": "payload"}), None).await?;

    // Listing leaves payloads unresolved; reading resolves them through
    // storage by ref.
    let listed = collection.list().await?;
    assert_eq!(listed.len(), 1);
    assert!(listed[0].data.is_none());
    assert!(listed[0].data_ref.is_some());

    let read = collection.read(&key("k")).await?;
    assert_eq!(read.data, Some(json!({"big": "payload"})));
    Ok(())
}

#[tokio::test]
async fn test_stale_writer_conflicts() -> anyhow::Result<()> {
    let collection = memory_collection();
    let created = collection.create(&key("k"), json!({"a": 1}), None).await?;
    collection.replace(&key("k"), json!({"a": 2}), None).await?;

    // A writer still holding the original version loses.
    let err = collection
        .log()
        .create(
            Some(key("k")),
            Operation::Update,
            None,
            None,
            Some(created.log_ref),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn test_regenerate_without_snapshot_replays_everything() -> anyhow::Result<()> {
    let collection = memory_collection();
    collection.create(&key("a"), json!(1), None).await?;
    collection.replace(&key("a"), json!(2), None).await?;
    collection.create(&key("b"), json!(3), None).await?;
    collection.delete(&key("b"), None).await?;

    let replayed = collection.regenerate().await?;
    assert_eq!(replayed, 4);
    assert_eq!(collection.keys().await?, vec![key("a")]);
    assert_eq!(collection.read(&key("a")).await?.data, Some(json!(2)));
    Ok(())
}

// Exercised separately from the facade so a broken Deref can't hide it: the
// frozen surface built by `at_time` is read-only end to end.
#[tokio::test]
async fn test_time_travel_surface_is_read_only() -> anyhow::Result<()> {
    let collection = memory_collection();
    let created = collection.create(&key("k"), json!(1), None).await?;
    let frozen = collection
        .at_time(created.modified_on, fresh_state(), true)
        .await?;
    assert!(frozen.log().is_read_only());

    let log: &Log = frozen.log();
    let err = log
        .create(Some(key("x")), Operation::Create, None, None, None, None)
        .await
        .unwrap_err();
    assert!(err.is_bad_request(), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn test_frozen_state_argument_is_materialized() -> anyhow::Result<()> {
    let collection = memory_collection();
    let created = collection.create(&key("k"), json!(1), None).await?;

    // With regenerate=false the provided state stays empty until the caller
    // replays it.
    let state: State = fresh_state();
    let frozen = collection
        .at_time(created.modified_on, state, false)
        .await?;
    assert!(frozen.keys().await?.is_empty());
    frozen.regenerate().await?;
    assert_eq!(frozen.keys().await?, vec![key("k")]);
    Ok(())
}

#[tokio::test]
async fn test_storage_is_shared_and_deduplicated() -> anyhow::Result<()> {
    let storage_backend = Arc::new(memory::MemoryBackend::new());
    let a = Collection::new(
        Storage::new(storage_backend.clone()),
        Log::new(Arc::new(memory::MemoryBackend::new())),
        fresh_state(),
    );
    let b = Collection::new(
        Storage::new(storage_backend.clone()),
        Log::new(Arc::new(memory::MemoryBackend::new())),
        fresh_state(),
    );

    let doc_a = a.create(&key("x"), json!({"same": "payload"}), None).await?;
    let doc_b = b.create(&key("y"), json!({"same": "payload"}), None).await?;
    // Content addressing dedups the shared payload across collections.
    assert_eq!(doc_a.data_ref, doc_b.data_ref);
    Ok(())
}
