//! Wire shapes exchanged with API clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use kismet_db::models::{ClusterRecord, CurrentState, DesiredState, ProvisionerOptions};

/// Provider-specific request options, decoded by the selected provider.
pub type RequestOptions = Map<String, Value>;

/// Desired configuration submitted on create and patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterRequest {
    pub name: String,
    pub desired_state: String,
    /// Accepted for symmetry with the response; the reconciler assigns it.
    #[serde(rename = "clusterIP", skip_serializing_if = "String::is_empty")]
    pub cluster_ip: String,
    pub etcd_count: i32,
    pub master_count: i32,
    pub worker_count: i32,
    pub ingress_count: i32,
    pub provisioner: ProvisionerRequest,
}

/// Provisioner selection plus its options, which may include secrets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerRequest {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<RequestOptions>,
}

/// What the API returns for a cluster.
///
/// Built from the record's plan and state only; credentials have no path
/// into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResponse {
    pub name: String,
    pub desired_state: DesiredState,
    pub current_state: CurrentState,
    #[serde(rename = "clusterIP")]
    pub cluster_ip: String,
    pub etcd_count: i32,
    pub master_count: i32,
    pub worker_count: i32,
    pub ingress_count: i32,
    pub provisioner: ProvisionerResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionerResponse {
    pub provider: String,
    #[serde(default, skip_serializing_if = "ProvisionerOptions::is_empty")]
    pub options: ProvisionerOptions,
}

impl From<&ClusterRecord> for ClusterResponse {
    fn from(record: &ClusterRecord) -> Self {
        let plan = &record.plan;
        Self {
            name: record.name.clone(),
            desired_state: record.desired_state,
            current_state: record.current_state,
            cluster_ip: plan.master.load_balanced_fqdn.clone(),
            etcd_count: plan.etcd.expected_count,
            master_count: plan.master.expected_count,
            worker_count: plan.worker.expected_count,
            ingress_count: plan.ingress.expected_count,
            provisioner: ProvisionerResponse {
                provider: plan.provisioner.provider.clone(),
                options: plan.provisioner.options.clone(),
            },
        }
    }
}
