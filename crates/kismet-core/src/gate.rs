//! Reconciler side of the continuation gate.
//!
//! The API sets the gate on every accepted mutation. A reconciler claims
//! the work with [`consume`], which clears the gate only if no newer
//! mutation has landed since the record was read. A losing clear leaves
//! the gate set, so the next pass picks the change up.

use anyhow::{Context, Result, bail};

use kismet_db::models::{ClusterRecord, CurrentState, DesiredState};
use kismet_db::store::ClusterStore;

/// Claim pending work on `name`.
///
/// Returns the snapshot that was claimed, or `None` when the gate was not
/// set, the record is gone, or a newer mutation won the race.
pub async fn consume(store: &dyn ClusterStore, name: &str) -> Result<Option<ClusterRecord>> {
    let Some(mut record) = store.get(name).await? else {
        return Ok(None);
    };
    if !record.can_continue {
        return Ok(None);
    }

    if !store.clear_gate(name, record.generation).await? {
        tracing::debug!(cluster = %name, generation = record.generation, "gate moved on before clear");
        return Ok(None);
    }

    record.can_continue = false;
    tracing::debug!(cluster = %name, generation = record.generation, "gate consumed");
    Ok(Some(record))
}

/// Names of clusters whose gate is set, sorted.
pub async fn pending(store: &dyn ClusterStore) -> Result<Vec<String>> {
    let all = store.get_all().await?;
    Ok(all
        .into_values()
        .filter(|r| r.can_continue)
        .map(|r| r.name)
        .collect())
}

/// Record the reconciler's view of a cluster.
///
/// Only `current_state` changes; a patch accepted meanwhile keeps its plan,
/// generation and open gate. Returns `false` when the cluster no longer
/// exists.
pub async fn report_state(store: &dyn ClusterStore, name: &str, state: CurrentState) -> Result<bool> {
    let found = store
        .set_current_state(name, state)
        .await
        .with_context(|| format!("failed to report state for cluster {name}"))?;

    if found {
        tracing::info!(cluster = %name, state = %state, "cluster state reported");
    }
    Ok(found)
}

/// Remove a torn-down cluster for good.
///
/// Refused unless the cluster's desired state is `destroyed`. Purging an
/// unknown cluster is a no-op.
pub async fn purge(store: &dyn ClusterStore, name: &str) -> Result<()> {
    let Some(record) = store.get(name).await? else {
        return Ok(());
    };
    if record.desired_state != DesiredState::Destroyed {
        bail!(
            "cluster {name} cannot be purged while its desired state is {}",
            record.desired_state
        );
    }

    store.delete(name).await?;
    tracing::info!(cluster = %name, "cluster purged");
    Ok(())
}
