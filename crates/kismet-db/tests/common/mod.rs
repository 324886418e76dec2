//! Store contract checks shared by the memory and PostgreSQL test suites.

#![allow(dead_code)]

use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use kismet_db::models::{
    ClusterRecord, CurrentState, DesiredState, NodeGroup, Plan, ProvisionerCredentials,
};
use kismet_db::store::ClusterStore;
use kismet_db::watch::{WatchEvent, WatchStream};

pub fn sample_record(name: &str) -> ClusterRecord {
    let mut plan = Plan::default();
    plan.cluster.name = name.to_string();
    plan.etcd = NodeGroup {
        expected_count: 3,
        nodes: Vec::new(),
    };
    plan.master.expected_count = 2;
    plan.worker.expected_count = 5;
    plan.ingress.expected_count = 2;
    plan.provisioner.provider = "aws".to_string();
    plan.provisioner
        .options
        .insert("region".to_string(), "us-east-1".to_string());

    let mut creds = ProvisionerCredentials::new();
    creds.insert("accessKeyID", "ACCESS_ID");
    creds.insert("secretAccessKey", "SECRET");

    ClusterRecord::planned(name, DesiredState::Installed, plan, creds)
}

pub async fn next_event(stream: &mut WatchStream) -> Option<WatchEvent> {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for watch event")
}

pub async fn get_absent_is_none(store: &dyn ClusterStore) {
    let got = store.get("missing").await.expect("get should succeed");
    assert!(got.is_none());
}

pub async fn get_all_empty(store: &dyn ClusterStore) {
    let all = store.get_all().await.expect("get_all should succeed");
    assert!(all.is_empty(), "expected empty map, got {} records", all.len());
}

pub async fn put_then_get(store: &dyn ClusterStore) {
    let record = sample_record("foo");
    store.put("foo", &record).await.expect("put should succeed");

    let got = store.get("foo").await.unwrap().expect("record should exist");
    assert_eq!(got.name, "foo");
    assert_eq!(got.plan.etcd.expected_count, 3);
    assert_eq!(got.plan.master.expected_count, 2);
    assert_eq!(got.plan.worker.expected_count, 5);
    assert_eq!(got.plan.ingress.expected_count, 2);
    assert_eq!(got.credentials.get("secretAccessKey"), Some("SECRET"));
    assert_eq!(got.current_state, CurrentState::Planned);
    assert!(got.can_continue);
}

pub async fn put_overwrites(store: &dyn ClusterStore) {
    let mut record = sample_record("foo");
    store.put("foo", &record).await.unwrap();

    record.plan.worker.expected_count = 6;
    record.mark_mutated();
    store.put("foo", &record).await.unwrap();

    let got = store.get("foo").await.unwrap().unwrap();
    assert_eq!(got.plan.worker.expected_count, 6);
    assert_eq!(got.generation, 2);
    assert_eq!(store.get_all().await.unwrap().len(), 1);
}

pub async fn put_uses_key_as_name(store: &dyn ClusterStore) {
    let record = sample_record("other");
    store.put("foo", &record).await.unwrap();
    let got = store.get("foo").await.unwrap().unwrap();
    assert_eq!(got.name, "foo");
    assert!(store.get("other").await.unwrap().is_none());
}

pub async fn insert_only_when_absent(store: &dyn ClusterStore) {
    let first = sample_record("foo");
    assert!(store.insert("foo", &first).await.unwrap());

    let mut second = sample_record("foo");
    second.plan.worker.expected_count = 99;
    assert!(!store.insert("foo", &second).await.unwrap());

    let got = store.get("foo").await.unwrap().unwrap();
    assert_eq!(got.plan.worker.expected_count, 5, "first insert must win");
}

pub async fn delete_removes(store: &dyn ClusterStore) {
    store.put("foo", &sample_record("foo")).await.unwrap();
    store.put("bar", &sample_record("bar")).await.unwrap();
    store.delete("foo").await.unwrap();

    assert!(store.get("foo").await.unwrap().is_none());
    let all = store.get_all().await.unwrap();
    assert_eq!(all.keys().collect::<Vec<_>>(), vec!["bar"]);

    // Deleting again is not an error.
    store.delete("foo").await.unwrap();
}

pub async fn clear_gate_checks_generation(store: &dyn ClusterStore) {
    let mut record = sample_record("foo");
    store.put("foo", &record).await.unwrap();

    // A patch lands after the reconciler read generation 1.
    record.mark_mutated();
    store.put("foo", &record).await.unwrap();

    assert!(!store.clear_gate("foo", 1).await.unwrap(), "stale generation");
    assert!(store.get("foo").await.unwrap().unwrap().can_continue);

    assert!(store.clear_gate("foo", 2).await.unwrap());
    assert!(!store.get("foo").await.unwrap().unwrap().can_continue);

    // Already clear.
    assert!(!store.clear_gate("foo", 2).await.unwrap());
    assert!(!store.clear_gate("missing", 1).await.unwrap());
}

pub async fn set_current_state_keeps_newer_patch(store: &dyn ClusterStore) {
    let mut record = sample_record("foo");
    store.put("foo", &record).await.unwrap();
    assert!(store.clear_gate("foo", 1).await.unwrap());

    // The reconciler saw generation 1; a patch lands before it reports.
    record.plan.worker.expected_count = 6;
    record.mark_mutated();
    store.put("foo", &record).await.unwrap();

    assert!(
        store
            .set_current_state("foo", CurrentState::Provisioning)
            .await
            .unwrap()
    );
    let got = store.get("foo").await.unwrap().unwrap();
    assert_eq!(got.current_state, CurrentState::Provisioning);
    assert_eq!(got.plan.worker.expected_count, 6);
    assert_eq!(got.generation, 2);
    assert!(got.can_continue, "patch gate must stay open");
    assert_eq!(got.credentials.get("secretAccessKey"), Some("SECRET"));

    // Same state again is still a hit.
    assert!(
        store
            .set_current_state("foo", CurrentState::Provisioning)
            .await
            .unwrap()
    );
    assert!(
        !store
            .set_current_state("missing", CurrentState::Error)
            .await
            .unwrap()
    );
}

pub async fn watch_sees_state_changes(store: &dyn ClusterStore) {
    store.put("foo", &sample_record("foo")).await.unwrap();

    let cancel = CancellationToken::new();
    let mut stream = store.watch(&cancel, 16).await.unwrap();

    store
        .set_current_state("foo", CurrentState::Installing)
        .await
        .unwrap();
    // Unchanged state is silent.
    store
        .set_current_state("foo", CurrentState::Installing)
        .await
        .unwrap();
    store.put("bar", &sample_record("bar")).await.unwrap();

    assert_eq!(next_event(&mut stream).await, Some(WatchEvent::put("foo", 1)));
    assert_eq!(next_event(&mut stream).await, Some(WatchEvent::put("bar", 1)));
    cancel.cancel();
}

pub async fn watch_sees_mutations_in_order(store: &dyn ClusterStore) {
    let cancel = CancellationToken::new();
    let mut stream = store.watch(&cancel, 16).await.expect("watch should start");

    let mut record = sample_record("foo");
    assert!(store.insert("foo", &record).await.unwrap());
    record.mark_mutated();
    store.put("foo", &record).await.unwrap();
    store.clear_gate("foo", 2).await.unwrap();
    store.delete("foo").await.unwrap();

    assert_eq!(next_event(&mut stream).await, Some(WatchEvent::put("foo", 1)));
    assert_eq!(next_event(&mut stream).await, Some(WatchEvent::put("foo", 2)));
    assert_eq!(
        next_event(&mut stream).await,
        Some(WatchEvent::delete("foo", 2)),
        "clear_gate must not produce an event"
    );

    cancel.cancel();
    assert_eq!(next_event(&mut stream).await, None);
}

pub async fn watch_failed_insert_is_silent(store: &dyn ClusterStore) {
    store.put("foo", &sample_record("foo")).await.unwrap();

    let cancel = CancellationToken::new();
    let mut stream = store.watch(&cancel, 16).await.unwrap();

    assert!(!store.insert("foo", &sample_record("foo")).await.unwrap());
    store.put("bar", &sample_record("bar")).await.unwrap();

    let event = next_event(&mut stream).await.unwrap();
    assert_eq!(event.name, "bar");
    cancel.cancel();
}

pub async fn watch_overflow_keeps_newest(store: &dyn ClusterStore) {
    let cancel = CancellationToken::new();
    let mut stream = store.watch(&cancel, 2).await.unwrap();

    let mut record = sample_record("foo");
    store.put("foo", &record).await.unwrap();
    for _ in 0..4 {
        record.mark_mutated();
        store.put("foo", &record).await.unwrap();
    }
    // Let a background listener catch up before reading.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(next_event(&mut stream).await, Some(WatchEvent::put("foo", 4)));
    assert_eq!(next_event(&mut stream).await, Some(WatchEvent::put("foo", 5)));
    cancel.cancel();
}

pub async fn abandoned_watch_does_not_block_writers(store: &dyn ClusterStore) {
    let cancel = CancellationToken::new();
    let _unread = store.watch(&cancel, 1).await.unwrap();

    let mut record = sample_record("foo");
    store.put("foo", &record).await.unwrap();
    for _ in 0..20 {
        record.mark_mutated();
        tokio::time::timeout(Duration::from_secs(5), store.put("foo", &record))
            .await
            .expect("put must not block on an unread subscriber")
            .unwrap();
    }
    cancel.cancel();
}
