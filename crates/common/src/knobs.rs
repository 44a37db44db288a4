//! Tunable limits and parameters.
//!
//! Every knob can be overridden with an environment variable of the same
//! name. Each should have a comment explaining what it's for so it can be
//! adjusted safely when needed.

use std::sync::LazyLock;

use cmd_util::env::env_config;

/// How many data blobs replay fetches per `bulk_read` while rebuilding state
/// from the log. Larger values cut round trips to the storage backend at the
/// cost of peak memory.
pub static REPLAY_BULK_READ_CHUNK_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("REPLAY_BULK_READ_CHUNK_SIZE", 256));
