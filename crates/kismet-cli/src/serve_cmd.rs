use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use tower_http::cors::CorsLayer;

use kismet_core::{ClusterError, ClusterRequest, ClusterService, ProviderRegistry};
use kismet_db::pool;
use kismet_db::store::{ClusterStore, MemoryStore, PgStore};

use crate::assets::ClusterAssets;
use crate::config::{KismetConfig, StoreKind};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

enum ErrorBody {
    Text(String),
    Json(serde_json::Value),
}

pub struct AppError {
    status: StatusCode,
    body: ErrorBody,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody::Text(msg.into()),
        }
    }

    /// Every violated rule, as a JSON array of messages.
    pub fn validation(errors: Vec<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody::Json(serde_json::json!(errors)),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody::Json(serde_json::json!({ "error": msg.into() })),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            body: ErrorBody::Json(serde_json::json!({ "error": msg.into() })),
        }
    }

    /// Logged in full here; the client only learns that it failed.
    pub fn internal(err: anyhow::Error) -> Self {
        let detail = format!("{err:#}");
        tracing::error!(error = %detail, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody::Json(serde_json::json!({ "error": "internal server error" })),
        }
    }
}

impl From<ClusterError> for AppError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Validation(errors) => Self::validation(errors),
            ClusterError::NotFound(_) => Self::not_found(err.to_string()),
            ClusterError::Conflict(_) => Self::conflict(err.to_string()),
            ClusterError::Build(e) => {
                Self::internal(anyhow::Error::new(e).context("could not build plan"))
            }
            ClusterError::Backend(e) => Self::internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.body {
            ErrorBody::Text(text) => (self.status, text).into_response(),
            ErrorBody::Json(body) => (self.status, Json(body)).into_response(),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub clusters: ClusterService,
    pub assets: ClusterAssets,
}

impl AppState {
    pub fn new(store: Arc<dyn ClusterStore>, assets: ClusterAssets) -> Self {
        Self {
            clusters: ClusterService::new(store, Arc::new(ProviderRegistry::with_defaults())),
            assets,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/clusters", get(list_clusters).post(create_cluster))
        .route(
            "/clusters/{name}",
            get(get_cluster).put(update_cluster).delete(delete_cluster),
        )
        .route("/clusters/{name}/kubeconfig", get(get_kubeconfig))
        .route("/clusters/{name}/logs", get(get_logs))
        .route("/clusters/{name}/assets", get(get_assets))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(config: &KismetConfig) -> Result<()> {
    let mut pg_pool = None;
    let store: Arc<dyn ClusterStore> = match config.store {
        StoreKind::Memory => {
            tracing::warn!("using the in-memory store; records are lost on exit");
            Arc::new(MemoryStore::new())
        }
        StoreKind::Postgres => {
            let db_pool = pool::create_pool(&config.db_config).await?;
            pg_pool = Some(db_pool.clone());
            Arc::new(PgStore::new(db_pool))
        }
    };

    let state = AppState::new(store, ClusterAssets::new(&config.assets_dir));
    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    tracing::info!(
        store = %config.store,
        assets = %config.assets_dir.display(),
        "kismet serve listening on http://{addr}"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(db_pool) = pg_pool {
        db_pool.close().await;
    }
    tracing::info!("kismet serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

const OK_BODY: &str = "ok\n";

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request(format!("could not decode body: {e}\n")))
}

async fn create_cluster(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let req: ClusterRequest = decode(&body)?;
    state.clusters.create(&req).await?;
    Ok((StatusCode::ACCEPTED, OK_BODY).into_response())
}

async fn list_clusters(State(state): State<AppState>) -> Result<Response, AppError> {
    let clusters = state.clusters.list().await?;
    Ok(Json(clusters).into_response())
}

async fn get_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let cluster = state.clusters.get(&name).await?;
    Ok(Json(cluster).into_response())
}

async fn update_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let req: ClusterRequest = decode(&body)?;
    let updated = state.clusters.update(&name, &req).await?;
    Ok((StatusCode::ACCEPTED, Json(updated)).into_response())
}

async fn delete_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    state.clusters.delete(&name).await?;
    Ok((StatusCode::ACCEPTED, OK_BODY).into_response())
}

async fn ensure_exists(state: &AppState, name: &str) -> Result<(), AppError> {
    if state.clusters.exists(name).await? {
        Ok(())
    } else {
        Err(AppError::not_found(format!("cluster {name:?} not found")))
    }
}

async fn get_kubeconfig(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    ensure_exists(&state, &name).await?;
    let contents = state
        .assets
        .read_kubeconfig(&name)
        .await
        .map_err(AppError::internal)?;
    let headers = [
        (CONTENT_TYPE, "application/octet-stream"),
        (CONTENT_DISPOSITION, "attachment; filename=config"),
    ];
    Ok((headers, contents).into_response())
}

async fn get_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    ensure_exists(&state, &name).await?;
    let contents = state.assets.read_log(&name).await.map_err(AppError::internal)?;
    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], contents).into_response())
}

async fn get_assets(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    ensure_exists(&state, &name).await?;
    let archive = state.assets.archive(&name).await.map_err(AppError::internal)?;
    let headers = [
        (CONTENT_TYPE, "application/gzip".to_string()),
        (
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}-assets.tar.gz\"", filename_safe(&name)),
        ),
    ];
    Ok((headers, archive).into_response())
}

/// Cluster names may hold anything; header values may not.
fn filename_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
