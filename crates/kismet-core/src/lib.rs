//! Cluster lifecycle rules on top of the record store.
//!
//! Request flow for the API:
//!
//! ```text
//! ClusterRequest --validate--> ProviderRegistry checks
//!                --plan-----> template expansion / merge
//!                --clusters-> ClusterStore (insert / put), gate set
//! ```
//!
//! The reconciler side of the continuation gate lives in [`gate`].

pub mod clusters;
pub mod error;
pub mod gate;
pub mod labels;
pub mod plan;
pub mod provider;
pub mod request;
pub mod validate;

pub use clusters::ClusterService;
pub use error::ClusterError;
pub use provider::{Provider, ProviderRegistry};
pub use request::{ClusterRequest, ClusterResponse, ProvisionerRequest};
