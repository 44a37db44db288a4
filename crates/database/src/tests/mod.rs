use std::sync::Arc;

use common::document::DocumentKey;
use memory::MemoryBackend;

use crate::{
    Collection,
    Log,
    State,
    Storage,
};

mod scenarios;

fn memory_collection() -> Collection {
    cmd_util::env::config_test();
    Collection::new(
        Storage::new(Arc::new(MemoryBackend::new())),
        Log::new(Arc::new(MemoryBackend::new())),
        State::new(Arc::new(MemoryBackend::new())),
    )
}

fn fresh_state() -> State {
    State::new(Arc::new(MemoryBackend::new()))
}

/// A collection sharing `collection`'s storage and log, with an empty state.
fn clone_with_fresh_state(collection: &Collection) -> Collection {
    Collection::new(
        collection.storage().clone(),
        collection.log().clone(),
        fresh_state(),
    )
}

fn key(s: &str) -> DocumentKey {
    s.parse().expect("test key is valid")
}
