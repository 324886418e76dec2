use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::models::{ClusterRecord, CurrentState};
use crate::watch::{WatchEvent, WatchHub, WatchStream};

use super::{ClusterStore, keyed};

/// Process-local store.
///
/// Events are published while the write lock is held, so subscribers see
/// them in the same order the writes were applied.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, ClusterRecord>>,
    hub: Arc<WatchHub>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live watch subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<ClusterRecord>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, ClusterRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn put(&self, name: &str, record: &ClusterRecord) -> Result<()> {
        let stored = keyed(name, record);
        let generation = stored.generation;
        let mut records = self.records.write().await;
        records.insert(name.to_owned(), stored);
        self.hub.publish(WatchEvent::put(name, generation));
        Ok(())
    }

    async fn insert(&self, name: &str, record: &ClusterRecord) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.entry(name.to_owned()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                let stored = slot.insert(keyed(name, record));
                self.hub.publish(WatchEvent::put(name, stored.generation));
                Ok(true)
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(removed) = records.remove(name) {
            self.hub.publish(WatchEvent::delete(name, removed.generation));
        }
        Ok(())
    }

    async fn clear_gate(&self, name: &str, generation: i64) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(name) {
            Some(record) if record.can_continue && record.generation == generation => {
                record.can_continue = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_current_state(&self, name: &str, state: CurrentState) -> Result<bool> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(name) else {
            return Ok(false);
        };
        if record.current_state != state {
            record.current_state = state;
            record.updated_at = Utc::now();
            self.hub.publish(WatchEvent::put(name, record.generation));
        }
        Ok(true)
    }

    async fn watch(&self, cancel: &CancellationToken, buffer: usize) -> Result<WatchStream> {
        Ok(self.hub.subscribe(cancel, buffer))
    }
}
