//! The `Provider` trait: per-provider validation and option handling.

use kismet_db::models::{ProvisionerCredentials, ProvisionerOptions};

use crate::plan::PlanBuildError;
use crate::request::RequestOptions;

/// Plan-safe options and the secrets split out of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Stored in the plan and echoed to clients.
    pub options: ProvisionerOptions,
    /// Stored beside the plan, never echoed.
    pub credentials: ProvisionerCredentials,
}

/// Capability set of one provisioner provider.
pub trait Provider: Send + Sync {
    /// Provider identifier as it appears in requests (e.g. "aws").
    fn name(&self) -> &str;

    /// Check the provider options of a request.
    ///
    /// Returns one message per violated rule; empty means valid. Must not
    /// stop at the first problem.
    fn validate(&self, options: Option<&RequestOptions>) -> Vec<String>;

    /// Split validated request options into plan options and credentials.
    fn build_options(
        &self,
        options: Option<&RequestOptions>,
    ) -> Result<ProviderSettings, PlanBuildError>;
}

// Compile-time assertion: Provider must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Provider) {}
};
