//! Request validation.
//!
//! Checks never stop at the first failure: every violated rule adds one
//! message, and the full list goes back to the client in one response.

use kismet_db::models::{ClusterRecord, DesiredState};

use crate::provider::ProviderRegistry;
use crate::request::{ClusterRequest, ProvisionerRequest};

/// Desired states a request may ask for. `destroyed` is reached only
/// through delete.
pub const REQUESTABLE_STATES: &[DesiredState] = &[DesiredState::Installed];

/// Largest node count a single group may ask for.
pub const MAX_GROUP_COUNT: i32 = u16::MAX as i32;

/// Collects rule violations.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = String>) {
        self.errors.extend(messages);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok` when nothing was added, otherwise every message in order.
    pub fn finish(self) -> Result<(), Vec<String>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Validate a create request.
pub fn validate_create(req: &ClusterRequest, providers: &ProviderRegistry) -> Result<(), Vec<String>> {
    let mut v = Validator::new();
    check_request(&mut v, req, providers, false);
    v.finish()
}

/// Validate a patch of `existing` addressed as `id`.
///
/// A patch that keeps the stored provider and omits its options keeps the
/// stored options and credentials, so the provider's option rules are not
/// applied to it.
pub fn validate_patch(
    id: &str,
    req: &ClusterRequest,
    existing: &ClusterRecord,
    providers: &ProviderRegistry,
) -> Result<(), Vec<String>> {
    let keeps_stored_options = req.provisioner.options.is_none()
        && req.provisioner.provider == existing.plan.provisioner.provider
        && !existing.credentials.is_empty();

    let mut v = Validator::new();
    check_request(&mut v, req, providers, keeps_stored_options);

    if id != req.name {
        v.add(format!("name {:?} does not match the cluster being updated ({id:?})", req.name));
    }
    if req.name != existing.name {
        v.add(format!(
            "name cannot be changed (stored name is {:?})",
            existing.name
        ));
    }
    let stored_etcd = existing.plan.etcd.expected_count;
    if req.etcd_count != stored_etcd {
        v.add(format!(
            "cluster.etcdCount cannot be changed (stored count is {stored_etcd})"
        ));
    }
    v.finish()
}

fn check_request(
    v: &mut Validator,
    req: &ClusterRequest,
    providers: &ProviderRegistry,
    keeps_stored_options: bool,
) {
    if req.name.is_empty() {
        v.add("name cannot be empty");
    }

    if req.desired_state.is_empty() {
        v.add("desiredState cannot be empty");
    } else if !REQUESTABLE_STATES
        .iter()
        .any(|s| s.to_string() == req.desired_state)
    {
        let options: Vec<String> = REQUESTABLE_STATES.iter().map(|s| s.to_string()).collect();
        v.add(format!(
            "{} is not a valid desiredState, options are: {}",
            req.desired_state,
            bracketed(&options)
        ));
    }

    for (field, count) in [
        ("etcdCount", req.etcd_count),
        ("masterCount", req.master_count),
        ("workerCount", req.worker_count),
    ] {
        if count <= 0 {
            v.add(format!("cluster.{field} must be greater than 0"));
        }
    }
    if req.ingress_count < 0 {
        v.add("cluster.ingressCount must be greater than or equal to 0");
    }
    for (field, count) in [
        ("etcdCount", req.etcd_count),
        ("masterCount", req.master_count),
        ("workerCount", req.worker_count),
        ("ingressCount", req.ingress_count),
    ] {
        if count > MAX_GROUP_COUNT {
            v.add(format!("cluster.{field} must be at most {MAX_GROUP_COUNT}"));
        }
    }

    check_provisioner(v, &req.provisioner, providers, keeps_stored_options);
}

fn check_provisioner(
    v: &mut Validator,
    p: &ProvisionerRequest,
    providers: &ProviderRegistry,
    keeps_stored_options: bool,
) {
    if p.provider.is_empty() {
        v.add("provisioner.provider cannot be empty");
        return;
    }
    match providers.get(&p.provider) {
        Some(_) if keeps_stored_options => {}
        Some(provider) => v.extend(provider.validate(p.options.as_ref())),
        None => v.add(format!(
            "{} is not a valid provisioner.provider, options are: {}",
            p.provider,
            bracketed(&providers.names())
        )),
    }
}

/// `[a b c]`, the list format clients already parse.
fn bracketed<S: AsRef<str>>(items: &[S]) -> String {
    let joined: Vec<&str> = items.iter().map(|s| s.as_ref()).collect();
    format!("[{}]", joined.join(" "))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
