//! Plan building: template expansion for new clusters, merging for patches.

pub mod builder;
pub mod template;

use thiserror::Error;

pub use builder::{BuiltPlan, build_plan, merge_plan};
pub use template::{PlanTemplateOptions, expand_plan_template, render_plan_template};

/// Errors that can occur while constructing a plan.
///
/// Nothing is written to the store when one of these is returned.
#[derive(Debug, Error)]
pub enum PlanBuildError {
    #[error("plan template did not decode: {0}")]
    Template(#[from] toml::de::Error),

    #[error("invalid {group} count {count}")]
    InvalidCount { group: &'static str, count: i32 },

    #[error("unknown provisioner provider {0:?}")]
    UnknownProvider(String),

    #[error("could not decode options for provider {provider:?}: {source}")]
    Options {
        provider: String,
        #[source]
        source: serde_json::Error,
    },
}
