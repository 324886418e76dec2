//! Continuation gate handoff between the service and a reconciler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use kismet_core::gate;
use kismet_core::{ClusterRequest, ClusterService, ProviderRegistry, ProvisionerRequest};
use kismet_db::models::{ClusterRecord, CurrentState};
use kismet_db::store::{ClusterStore, MemoryStore};
use kismet_db::watch::{WatchEvent, WatchEventKind, WatchStream};

fn setup() -> (ClusterService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = ClusterService::new(
        store.clone() as Arc<dyn ClusterStore>,
        Arc::new(ProviderRegistry::with_defaults()),
    );
    (service, store)
}

fn request(workers: i32) -> ClusterRequest {
    ClusterRequest {
        name: "foo".to_string(),
        desired_state: "installed".to_string(),
        etcd_count: 3,
        master_count: 2,
        worker_count: workers,
        ingress_count: 0,
        provisioner: ProvisionerRequest {
            provider: "aws".to_string(),
            options: json!({"accessKeyID": "ACCESS_ID", "secretAccessKey": "SECRET"})
                .as_object()
                .cloned(),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn consume_claims_once() {
    let (service, store) = setup();
    service.create(&request(5)).await.unwrap();

    let claimed = gate::consume(store.as_ref(), "foo").await.unwrap().unwrap();
    assert_eq!(claimed.generation, 1);
    assert!(!claimed.can_continue);

    assert!(gate::consume(store.as_ref(), "foo").await.unwrap().is_none());
    assert!(gate::pending(store.as_ref()).await.unwrap().is_empty());
}

#[tokio::test]
async fn consume_missing_cluster_is_none() {
    let (_service, store) = setup();
    assert!(gate::consume(store.as_ref(), "foo").await.unwrap().is_none());
}

#[tokio::test]
async fn patch_after_read_is_not_lost() {
    let (service, store) = setup();
    service.create(&request(5)).await.unwrap();

    // Reconciler read generation 1, then a patch lands before it clears.
    let seen = store.get("foo").await.unwrap().unwrap();
    service.update("foo", &request(6)).await.unwrap();

    assert!(!store.clear_gate("foo", seen.generation).await.unwrap());
    assert_eq!(gate::pending(store.as_ref()).await.unwrap(), vec!["foo"]);

    let claimed = gate::consume(store.as_ref(), "foo").await.unwrap().unwrap();
    assert_eq!(claimed.generation, 2);
    assert_eq!(claimed.plan.worker.expected_count, 6);
}

#[tokio::test]
async fn every_mutation_reopens_the_gate() {
    let (service, store) = setup();
    service.create(&request(5)).await.unwrap();
    gate::consume(store.as_ref(), "foo").await.unwrap();

    service.update("foo", &request(6)).await.unwrap();
    assert_eq!(gate::pending(store.as_ref()).await.unwrap(), vec!["foo"]);
    gate::consume(store.as_ref(), "foo").await.unwrap();

    service.delete("foo").await.unwrap();
    assert_eq!(gate::pending(store.as_ref()).await.unwrap(), vec!["foo"]);
}

#[tokio::test]
async fn report_state_leaves_gate_alone() {
    let (service, store) = setup();
    service.create(&request(5)).await.unwrap();

    assert!(
        gate::report_state(store.as_ref(), "foo", CurrentState::Provisioning)
            .await
            .unwrap()
    );
    let record = store.get("foo").await.unwrap().unwrap();
    assert_eq!(record.current_state, CurrentState::Provisioning);
    assert!(record.can_continue);
    assert_eq!(record.generation, 1);

    assert!(
        !gate::report_state(store.as_ref(), "bar", CurrentState::Error)
            .await
            .unwrap()
    );
}

/// Memory store whose state reports stall, leaving room for a patch to land
/// while one is in flight.
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl ClusterStore for SlowStore {
    async fn get(&self, name: &str) -> anyhow::Result<Option<ClusterRecord>> {
        self.inner.get(name).await
    }

    async fn get_all(&self) -> anyhow::Result<BTreeMap<String, ClusterRecord>> {
        self.inner.get_all().await
    }

    async fn put(&self, name: &str, record: &ClusterRecord) -> anyhow::Result<()> {
        self.inner.put(name, record).await
    }

    async fn insert(&self, name: &str, record: &ClusterRecord) -> anyhow::Result<bool> {
        self.inner.insert(name, record).await
    }

    async fn delete(&self, name: &str) -> anyhow::Result<()> {
        self.inner.delete(name).await
    }

    async fn clear_gate(&self, name: &str, generation: i64) -> anyhow::Result<bool> {
        self.inner.clear_gate(name, generation).await
    }

    async fn set_current_state(&self, name: &str, state: CurrentState) -> anyhow::Result<bool> {
        tokio::time::sleep(self.delay).await;
        self.inner.set_current_state(name, state).await
    }

    async fn watch(&self, cancel: &CancellationToken, buffer: usize) -> anyhow::Result<WatchStream> {
        self.inner.watch(cancel, buffer).await
    }
}

#[tokio::test]
async fn report_state_during_patch_keeps_the_patch() {
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(100),
    });
    let service = ClusterService::new(
        store.clone() as Arc<dyn ClusterStore>,
        Arc::new(ProviderRegistry::with_defaults()),
    );

    service.create(&request(5)).await.unwrap();
    gate::consume(store.as_ref(), "foo").await.unwrap().unwrap();

    let reporter = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            gate::report_state(store.as_ref(), "foo", CurrentState::Installing).await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    service.update("foo", &request(6)).await.unwrap();
    assert!(!reporter.is_finished(), "report should still be in flight");
    assert!(reporter.await.unwrap().unwrap());

    let record = store.get("foo").await.unwrap().unwrap();
    assert_eq!(record.plan.worker.expected_count, 6);
    assert_eq!(record.generation, 2);
    assert!(record.can_continue, "patch gate must survive the report");
    assert_eq!(record.current_state, CurrentState::Installing);
    assert_eq!(gate::pending(store.as_ref()).await.unwrap(), vec!["foo"]);
}

#[tokio::test]
async fn purge_requires_destroyed() {
    let (service, store) = setup();
    service.create(&request(5)).await.unwrap();

    let err = gate::purge(store.as_ref(), "foo").await.unwrap_err();
    assert!(err.to_string().contains("cannot be purged"), "{err}");
    assert!(store.get("foo").await.unwrap().is_some());

    service.delete("foo").await.unwrap();
    gate::purge(store.as_ref(), "foo").await.unwrap();
    assert!(store.get("foo").await.unwrap().is_none());

    // Already gone.
    gate::purge(store.as_ref(), "foo").await.unwrap();
}

#[tokio::test]
async fn reconciler_loop_follows_watch() {
    let (service, store) = setup();
    let cancel = CancellationToken::new();
    let mut events = store.watch(&cancel, 8).await.unwrap();

    service.create(&request(5)).await.unwrap();
    service.update("foo", &request(6)).await.unwrap();
    service.delete("foo").await.unwrap();

    let mut claimed = Vec::new();
    for _ in 0..3 {
        let event: WatchEvent = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, WatchEventKind::Put);
        if let Some(record) = gate::consume(store.as_ref(), &event.name).await.unwrap() {
            claimed.push(record.generation);
        }
    }

    // Events were read after all writes, so only the newest snapshot is
    // claimed; the earlier events find the gate already cleared.
    assert_eq!(claimed, vec![3]);
    cancel.cancel();
}
