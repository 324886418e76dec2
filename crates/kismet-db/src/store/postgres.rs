use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tokio_util::sync::CancellationToken;

use crate::models::{ClusterRecord, CurrentState, DesiredState, Plan, ProvisionerCredentials};
use crate::watch::{WatchEvent, WatchQueue, WatchStream, subscription_stream};

use super::{ClusterStore, keyed};

/// `LISTEN`/`NOTIFY` channel carrying JSON-encoded [`WatchEvent`]s.
pub const NOTIFY_CHANNEL: &str = "kismet_cluster_events";

const SELECT_COLUMNS: &str = "SELECT name, desired_state, current_state, plan, credentials, \
     can_continue, generation, created_at, updated_at FROM clusters";

/// PostgreSQL-backed store.
///
/// Every write and its notification share one transaction, so listeners
/// hear about a change only once it has committed. Watching uses a
/// dedicated `LISTEN` connection per subscriber, which lets separate
/// processes (API server and reconciler) observe each other's writes.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct ClusterRow {
    name: String,
    desired_state: DesiredState,
    current_state: CurrentState,
    plan: Json<Plan>,
    credentials: Json<ProvisionerCredentials>,
    can_continue: bool,
    generation: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ClusterRow> for ClusterRecord {
    fn from(row: ClusterRow) -> Self {
        Self {
            name: row.name,
            desired_state: row.desired_state,
            current_state: row.current_state,
            plan: row.plan.0,
            credentials: row.credentials.0,
            can_continue: row.can_continue,
            generation: row.generation,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn notify(tx: &mut Transaction<'_, Postgres>, event: &WatchEvent) -> Result<()> {
    let payload = serde_json::to_string(event).context("failed to encode watch event")?;
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(NOTIFY_CHANNEL)
        .bind(payload)
        .execute(&mut **tx)
        .await
        .context("failed to publish watch event")?;
    Ok(())
}

#[async_trait]
impl ClusterStore for PgStore {
    async fn get(&self, name: &str) -> Result<Option<ClusterRecord>> {
        let row = sqlx::query_as::<_, ClusterRow>(&format!("{SELECT_COLUMNS} WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to fetch cluster {name}"))?;

        Ok(row.map(ClusterRecord::from))
    }

    async fn get_all(&self) -> Result<BTreeMap<String, ClusterRecord>> {
        let rows = sqlx::query_as::<_, ClusterRow>(&format!("{SELECT_COLUMNS} ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .context("failed to list clusters")?;

        Ok(rows
            .into_iter()
            .map(|row| (row.name.clone(), ClusterRecord::from(row)))
            .collect())
    }

    async fn put(&self, name: &str, record: &ClusterRecord) -> Result<()> {
        let record = keyed(name, record);
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO clusters \
               (name, desired_state, current_state, plan, credentials, can_continue, generation, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (name) DO UPDATE SET \
               desired_state = EXCLUDED.desired_state, \
               current_state = EXCLUDED.current_state, \
               plan = EXCLUDED.plan, \
               credentials = EXCLUDED.credentials, \
               can_continue = EXCLUDED.can_continue, \
               generation = EXCLUDED.generation, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(&record.name)
        .bind(record.desired_state)
        .bind(record.current_state)
        .bind(Json(&record.plan))
        .bind(Json(&record.credentials))
        .bind(record.can_continue)
        .bind(record.generation)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to put cluster {name}"))?;

        notify(&mut tx, &WatchEvent::put(name, record.generation)).await?;
        tx.commit().await.context("failed to commit transaction")?;
        Ok(())
    }

    async fn insert(&self, name: &str, record: &ClusterRecord) -> Result<bool> {
        let record = keyed(name, record);
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let result = sqlx::query(
            "INSERT INTO clusters \
               (name, desired_state, current_state, plan, credentials, can_continue, generation, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(&record.name)
        .bind(record.desired_state)
        .bind(record.current_state)
        .bind(Json(&record.plan))
        .bind(Json(&record.credentials))
        .bind(record.can_continue)
        .bind(record.generation)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert cluster {name}"))?;

        if result.rows_affected() == 0 {
            // Transaction rolls back on drop (no commit).
            return Ok(false);
        }

        notify(&mut tx, &WatchEvent::put(name, record.generation)).await?;
        tx.commit().await.context("failed to commit transaction")?;
        Ok(true)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let removed: Option<i64> =
            sqlx::query_scalar("DELETE FROM clusters WHERE name = $1 RETURNING generation")
                .bind(name)
                .fetch_optional(&mut *tx)
                .await
                .with_context(|| format!("failed to delete cluster {name}"))?;

        if let Some(generation) = removed {
            notify(&mut tx, &WatchEvent::delete(name, generation)).await?;
        }
        tx.commit().await.context("failed to commit transaction")?;
        Ok(())
    }

    async fn clear_gate(&self, name: &str, generation: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE clusters SET can_continue = FALSE \
             WHERE name = $1 AND generation = $2 AND can_continue",
        )
        .bind(name)
        .bind(generation)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to clear continuation gate for cluster {name}"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_current_state(&self, name: &str, state: CurrentState) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let changed: Option<i64> = sqlx::query_scalar(
            "UPDATE clusters SET current_state = $2, updated_at = now() \
             WHERE name = $1 AND current_state <> $2 RETURNING generation",
        )
        .bind(name)
        .bind(state)
        .fetch_optional(&mut *tx)
        .await
        .with_context(|| format!("failed to set current state for cluster {name}"))?;

        let found = match changed {
            Some(generation) => {
                notify(&mut tx, &WatchEvent::put(name, generation)).await?;
                true
            }
            None => sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM clusters WHERE name = $1)")
                .bind(name)
                .fetch_one(&mut *tx)
                .await
                .with_context(|| format!("failed to look up cluster {name}"))?,
        };
        tx.commit().await.context("failed to commit transaction")?;
        Ok(found)
    }

    async fn watch(&self, cancel: &CancellationToken, buffer: usize) -> Result<WatchStream> {
        // LISTEN before returning so that no change committed after this
        // call is missed.
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .context("failed to open listen connection")?;
        listener
            .listen(NOTIFY_CHANNEL)
            .await
            .with_context(|| format!("failed to LISTEN on {NOTIFY_CHANNEL}"))?;

        let token = cancel.child_token();
        let queue = Arc::new(WatchQueue::new(buffer));
        let feed = Arc::clone(&queue);
        let stop = token.clone();

        tokio::spawn(async move {
            // `try_recv` yields `None` once the connection drops and
            // reconnects on the next call; anything sent in between is lost.
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    received = listener.try_recv() => match received {
                        Ok(Some(notification)) => {
                            match serde_json::from_str::<WatchEvent>(notification.payload()) {
                                Ok(event) => feed.push(event),
                                Err(e) => tracing::warn!(
                                    error = %e,
                                    payload = notification.payload(),
                                    "ignoring malformed watch notification"
                                ),
                            }
                        }
                        Ok(None) => {
                            tracing::warn!("watch listener connection lost, reconnecting");
                            feed.mark_gap();
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "watch listener error, reconnecting");
                            feed.mark_gap();
                            tokio::select! {
                                _ = stop.cancelled() => break,
                                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                            }
                        }
                    },
                }
            }
            tracing::debug!("watch listener stopped");
        });

        Ok(subscription_stream(queue, token))
    }
}
