//! Build a plan from a request, or merge a patch onto a stored plan.

use kismet_db::models::{ClusterRecord, Node, Plan, ProvisionerCredentials};

use crate::provider::{Provider, ProviderRegistry};
use crate::request::ClusterRequest;

use super::PlanBuildError;
use super::template::{PlanTemplateOptions, expand_plan_template};

/// A plan plus the credentials stored beside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPlan {
    pub plan: Plan,
    pub credentials: ProvisionerCredentials,
}

/// Build the plan for a new cluster from a validated request.
pub fn build_plan(
    req: &ClusterRequest,
    providers: &ProviderRegistry,
) -> Result<BuiltPlan, PlanBuildError> {
    let provider = lookup(providers, &req.provisioner.provider)?;

    let mut plan = expand_plan_template(&PlanTemplateOptions {
        cluster_name: req.name.clone(),
        provider: provider.name().to_string(),
        etcd_nodes: group_size("etcd", req.etcd_count)?,
        master_nodes: group_size("master", req.master_count)?,
        worker_nodes: group_size("worker", req.worker_count)?,
        ingress_nodes: group_size("ingress", req.ingress_count)?,
    })?;

    let settings = provider.build_options(req.provisioner.options.as_ref())?;
    plan.provisioner.options = settings.options;

    Ok(BuiltPlan {
        plan,
        credentials: settings.credentials,
    })
}

/// Merge a validated patch onto the stored plan.
///
/// Identity fields stay as stored. Groups are resized in place, keeping
/// existing nodes. Provider options and credentials are replaced only when
/// the request carries options or switches provider.
pub fn merge_plan(
    existing: &ClusterRecord,
    req: &ClusterRequest,
    providers: &ProviderRegistry,
) -> Result<BuiltPlan, PlanBuildError> {
    let mut plan = existing.plan.clone();
    let mut credentials = existing.credentials.clone();

    let master = group_size("master", req.master_count)?;
    let worker = group_size("worker", req.worker_count)?;
    let ingress = group_size("ingress", req.ingress_count)?;

    plan.master.expected_count = req.master_count;
    resize(&mut plan.master.nodes, master);
    plan.worker.expected_count = req.worker_count;
    resize(&mut plan.worker.nodes, worker);
    plan.ingress.expected_count = req.ingress_count;
    resize(&mut plan.ingress.nodes, ingress);

    let switching = req.provisioner.provider != plan.provisioner.provider;
    if switching || req.provisioner.options.is_some() {
        let provider = lookup(providers, &req.provisioner.provider)?;
        let settings = provider.build_options(req.provisioner.options.as_ref())?;
        plan.provisioner.provider = provider.name().to_string();
        plan.provisioner.options = settings.options;
        credentials = settings.credentials;
    }

    Ok(BuiltPlan { plan, credentials })
}

fn lookup<'a>(
    providers: &'a ProviderRegistry,
    name: &str,
) -> Result<&'a dyn Provider, PlanBuildError> {
    providers
        .get(name)
        .ok_or_else(|| PlanBuildError::UnknownProvider(name.to_string()))
}

fn group_size(group: &'static str, count: i32) -> Result<u16, PlanBuildError> {
    u16::try_from(count).map_err(|_| PlanBuildError::InvalidCount { group, count })
}

/// Drop nodes beyond `count`, then pad with placeholders up to it.
fn resize(nodes: &mut Vec<Node>, count: u16) {
    let count = usize::from(count);
    nodes.truncate(count);
    nodes.resize_with(count, Node::default);
}

#[cfg(test)]
mod tests {
    use super::*;
    use kismet_db::models::DesiredState;
    use serde_json::json;

    use crate::request::{ProvisionerRequest, RequestOptions};

    fn options(value: serde_json::Value) -> Option<RequestOptions> {
        value.as_object().cloned()
    }

    fn request() -> ClusterRequest {
        ClusterRequest {
            name: "foo".to_string(),
            desired_state: "installed".to_string(),
            etcd_count: 3,
            master_count: 2,
            worker_count: 5,
            ingress_count: 2,
            provisioner: ProvisionerRequest {
                provider: "aws".to_string(),
                options: options(json!({
                    "accessKeyID": "ACCESS_ID",
                    "secretAccessKey": "SECRET",
                    "region": "us-east-1",
                })),
            },
            ..Default::default()
        }
    }

    fn stored(providers: &ProviderRegistry) -> ClusterRecord {
        let built = build_plan(&request(), providers).unwrap();
        let mut record =
            ClusterRecord::planned("foo", DesiredState::Installed, built.plan, built.credentials);
        // Provisioner filled in some hosts and the load balancer.
        record.plan.master.load_balanced_fqdn = "lb.example.com".to_string();
        for (i, node) in record.plan.worker.nodes.iter_mut().enumerate() {
            node.host = format!("worker{i}");
            node.ip = format!("10.0.0.{i}");
        }
        record
    }

    #[test]
    fn build_overlays_identity_and_provider() {
        let providers = ProviderRegistry::with_defaults();
        let built = build_plan(&request(), &providers).unwrap();

        assert_eq!(built.plan.cluster.name, "foo");
        assert_eq!(built.plan.worker.expected_count, 5);
        assert_eq!(built.plan.worker.nodes.len(), 5);
        assert_eq!(built.plan.provisioner.provider, "aws");
        assert_eq!(built.plan.provisioner.options["region"], "us-east-1");
        assert_eq!(built.credentials.get("secretAccessKey"), Some("SECRET"));
    }

    #[test]
    fn plan_never_contains_credentials() {
        let providers = ProviderRegistry::with_defaults();
        let built = build_plan(&request(), &providers).unwrap();
        let json = serde_json::to_string(&built.plan).unwrap();
        assert!(!json.contains("SECRET"));
        assert!(!json.contains("ACCESS_ID"));
    }

    #[test]
    fn build_rejects_unknown_provider() {
        let providers = ProviderRegistry::with_defaults();
        let mut req = request();
        req.provisioner.provider = "gce".to_string();
        let err = build_plan(&req, &providers).unwrap_err();
        assert!(matches!(err, PlanBuildError::UnknownProvider(ref p) if p == "gce"));
    }

    #[test]
    fn build_rejects_negative_count() {
        let providers = ProviderRegistry::with_defaults();
        let mut req = request();
        req.ingress_count = -1;
        let err = build_plan(&req, &providers).unwrap_err();
        assert!(matches!(
            err,
            PlanBuildError::InvalidCount {
                group: "ingress",
                count: -1
            }
        ));
    }

    #[test]
    fn merge_grows_group_and_keeps_hosts() {
        let providers = ProviderRegistry::with_defaults();
        let existing = stored(&providers);
        let mut req = request();
        req.worker_count = 6;
        req.provisioner.options = None;

        let merged = merge_plan(&existing, &req, &providers).unwrap();
        let workers = &merged.plan.worker.nodes;
        assert_eq!(merged.plan.worker.expected_count, 6);
        assert_eq!(workers.len(), 6);
        assert_eq!(workers[4].host, "worker4");
        assert!(workers[5].is_placeholder());
        assert_eq!(merged.plan.master.load_balanced_fqdn, "lb.example.com");
    }

    #[test]
    fn merge_shrinks_group_from_the_end() {
        let providers = ProviderRegistry::with_defaults();
        let existing = stored(&providers);
        let mut req = request();
        req.worker_count = 2;

        let merged = merge_plan(&existing, &req, &providers).unwrap();
        let hosts: Vec<_> = merged.plan.worker.nodes.iter().map(|n| n.host.as_str()).collect();
        assert_eq!(hosts, vec!["worker0", "worker1"]);
    }

    #[test]
    fn merge_without_options_keeps_provider_settings() {
        let providers = ProviderRegistry::with_defaults();
        let existing = stored(&providers);
        let mut req = request();
        req.provisioner.options = None;

        let merged = merge_plan(&existing, &req, &providers).unwrap();
        assert_eq!(merged.plan.provisioner.options["region"], "us-east-1");
        assert_eq!(merged.credentials, existing.credentials);
    }

    #[test]
    fn merge_with_options_replaces_them() {
        let providers = ProviderRegistry::with_defaults();
        let existing = stored(&providers);
        let mut req = request();
        req.provisioner.options = options(json!({
            "accessKeyID": "NEW_ID",
            "secretAccessKey": "NEW_SECRET",
            "region": "eu-west-1",
        }));

        let merged = merge_plan(&existing, &req, &providers).unwrap();
        assert_eq!(merged.plan.provisioner.options["region"], "eu-west-1");
        assert_eq!(merged.credentials.get("accessKeyID"), Some("NEW_ID"));
    }

    #[test]
    fn merge_keeps_identity_fields() {
        let providers = ProviderRegistry::with_defaults();
        let existing = stored(&providers);
        let merged = merge_plan(&existing, &request(), &providers).unwrap();
        assert_eq!(merged.plan.cluster.name, "foo");
        assert_eq!(merged.plan.etcd, existing.plan.etcd);
    }
}
