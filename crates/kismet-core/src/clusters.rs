//! Cluster service: the create / read / update / delete rules the API
//! exposes, on top of an injected [`ClusterStore`].

use std::sync::Arc;

use anyhow::Context;

use kismet_db::models::{ClusterRecord, DesiredState};
use kismet_db::store::ClusterStore;

use crate::error::ClusterError;
use crate::plan::{build_plan, merge_plan};
use crate::provider::ProviderRegistry;
use crate::request::{ClusterRequest, ClusterResponse};
use crate::validate::{validate_create, validate_patch};

/// Accepts cluster requests and records them for the reconciler.
///
/// Every accepted mutation sets the continuation gate and bumps the record
/// generation. Nothing here touches infrastructure.
#[derive(Clone)]
pub struct ClusterService {
    store: Arc<dyn ClusterStore>,
    providers: Arc<ProviderRegistry>,
}

impl ClusterService {
    pub fn new(store: Arc<dyn ClusterStore>, providers: Arc<ProviderRegistry>) -> Self {
        Self { store, providers }
    }

    pub fn store(&self) -> &Arc<dyn ClusterStore> {
        &self.store
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Validate, plan and record a new cluster.
    ///
    /// Of several concurrent creates for one name, exactly one succeeds; the
    /// rest get [`ClusterError::Conflict`].
    pub async fn create(&self, req: &ClusterRequest) -> Result<ClusterResponse, ClusterError> {
        validate_create(req, &self.providers).map_err(ClusterError::Validation)?;
        let desired = parse_desired(&req.desired_state)?;

        if self.exists(&req.name).await? {
            return Err(ClusterError::Conflict(req.name.clone()));
        }

        let built = build_plan(req, &self.providers)?;
        let record = ClusterRecord::planned(&req.name, desired, built.plan, built.credentials);

        let inserted = self
            .store
            .insert(&req.name, &record)
            .await
            .with_context(|| format!("could not put cluster {} to the store", req.name))?;
        if !inserted {
            return Err(ClusterError::Conflict(req.name.clone()));
        }

        tracing::info!(
            cluster = %req.name,
            provider = %record.plan.provisioner.provider,
            workers = record.plan.worker.expected_count,
            "cluster planned"
        );
        Ok(ClusterResponse::from(&record))
    }

    pub async fn get(&self, name: &str) -> Result<ClusterResponse, ClusterError> {
        let record = self.fetch(name).await?;
        Ok(ClusterResponse::from(&record))
    }

    /// Every cluster, sorted by name. Empty when there are none.
    pub async fn list(&self) -> Result<Vec<ClusterResponse>, ClusterError> {
        let all = self
            .store
            .get_all()
            .await
            .context("could not get clusters from the store")?;
        Ok(all.values().map(ClusterResponse::from).collect())
    }

    /// Merge a patch onto the cluster addressed as `id`.
    ///
    /// The current state is left alone; the reconciler owns it.
    pub async fn update(
        &self,
        id: &str,
        req: &ClusterRequest,
    ) -> Result<ClusterResponse, ClusterError> {
        let mut record = self.fetch(id).await?;
        validate_patch(id, req, &record, &self.providers).map_err(ClusterError::Validation)?;
        let desired = parse_desired(&req.desired_state)?;

        let merged = merge_plan(&record, req, &self.providers)?;
        record.plan = merged.plan;
        record.credentials = merged.credentials;
        record.desired_state = desired;
        record.mark_mutated();

        self.store
            .put(id, &record)
            .await
            .with_context(|| format!("could not put cluster {id} to the store"))?;

        tracing::info!(
            cluster = %id,
            generation = record.generation,
            workers = record.plan.worker.expected_count,
            "cluster updated"
        );
        Ok(ClusterResponse::from(&record))
    }

    /// Logical delete: mark the cluster for teardown and leave the record
    /// in place for the reconciler.
    pub async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        let mut record = self.fetch(name).await?;
        record.desired_state = DesiredState::Destroyed;
        record.mark_mutated();

        self.store
            .put(name, &record)
            .await
            .with_context(|| format!("could not put cluster {name} to the store"))?;

        tracing::info!(cluster = %name, generation = record.generation, "cluster marked for teardown");
        Ok(())
    }

    pub async fn exists(&self, name: &str) -> Result<bool, ClusterError> {
        let found = self
            .store
            .get(name)
            .await
            .with_context(|| format!("could not get cluster {name} from the store"))?;
        Ok(found.is_some())
    }

    async fn fetch(&self, name: &str) -> Result<ClusterRecord, ClusterError> {
        self.store
            .get(name)
            .await
            .with_context(|| format!("could not get cluster {name} from the store"))?
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))
    }
}

impl std::fmt::Debug for ClusterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterService")
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

fn parse_desired(value: &str) -> Result<DesiredState, ClusterError> {
    value
        .parse()
        .map_err(|e: kismet_db::models::DesiredStateParseError| {
            ClusterError::Validation(vec![e.to_string()])
        })
}
