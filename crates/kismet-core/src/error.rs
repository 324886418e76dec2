use thiserror::Error;

use crate::plan::PlanBuildError;

/// Why a cluster operation was refused or failed.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Every rule the request violated, in check order.
    #[error("invalid cluster request: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("cluster {0:?} not found")]
    NotFound(String),

    #[error("cluster {0:?} already exists")]
    Conflict(String),

    /// The plan could not be constructed; nothing was written.
    #[error("could not build plan: {0}")]
    Build(#[from] PlanBuildError),

    /// Store or filesystem failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ClusterError {
    /// Validation messages, if this is a validation failure.
    pub fn violations(&self) -> Option<&[String]> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}
