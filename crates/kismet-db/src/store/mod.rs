//! The record store contract.
//!
//! ```text
//! API (create/patch/delete) --insert/put--> ClusterStore --watch--> reconciler
//!                                              ^                        |
//!                                              +------------------------+
//!                               clear_gate / set_current_state / delete
//! ```
//!
//! Guarantees every implementation upholds:
//!
//! - `get` returns `Ok(None)` for an unknown name; `Err` means the backend
//!   failed.
//! - `get_all` returns an empty map when nothing is stored.
//! - `put` is an unconditional overwrite; the last write wins.
//! - `insert` writes only if the name is absent, atomically.
//! - `delete` is a hard removal and only the reconciler calls it.
//! - `clear_gate` clears `can_continue` only if the stored generation is the
//!   one the caller observed.
//! - `set_current_state` touches only `current_state` and `updated_at`; the
//!   plan, gate and generation are left as stored.
//! - `watch` yields one event per `put`, successful `insert`, effective
//!   `set_current_state` and effective `delete`, in commit order.
//!   `clear_gate` produces no event. Each
//!   subscriber buffers at most `buffer` events and drops the oldest on
//!   overflow.
//!
//! Records are keyed by the `name` argument; implementations store the
//! record with `name` set to that key.

mod memory;
mod postgres;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::models::{ClusterRecord, CurrentState};
use crate::watch::WatchStream;

pub use memory::MemoryStore;
pub use postgres::{PgStore, NOTIFY_CHANNEL};

/// Persistence and change notification for cluster records.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch one record.
    async fn get(&self, name: &str) -> Result<Option<ClusterRecord>>;

    /// Fetch every record, keyed by name.
    async fn get_all(&self) -> Result<BTreeMap<String, ClusterRecord>>;

    /// Create or overwrite a record.
    async fn put(&self, name: &str, record: &ClusterRecord) -> Result<()>;

    /// Create a record if no record with this name exists.
    ///
    /// Returns `false` (and writes nothing) when the name is taken.
    async fn insert(&self, name: &str, record: &ClusterRecord) -> Result<bool>;

    /// Remove a record. Removing an absent record is not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Clear the continuation gate if it is set and the stored generation
    /// equals `generation`. Returns whether the gate was cleared.
    async fn clear_gate(&self, name: &str, generation: i64) -> Result<bool>;

    /// Record the reconciler's view of a cluster in place.
    ///
    /// Returns `false` when the record does not exist. Setting the state it
    /// already has changes nothing and publishes no event.
    async fn set_current_state(&self, name: &str, state: CurrentState) -> Result<bool>;

    /// Subscribe to changes until `cancel` fires or the stream is dropped.
    async fn watch(&self, cancel: &CancellationToken, buffer: usize) -> Result<WatchStream>;
}

// Compile-time assertion: ClusterStore must be usable as `dyn ClusterStore`.
const _: () = {
    fn _assert_object_safe(_: &dyn ClusterStore) {}
};

fn keyed(name: &str, record: &ClusterRecord) -> ClusterRecord {
    let mut stored = record.clone();
    if stored.name != name {
        stored.name = name.to_owned();
    }
    stored
}
