//! Inputs for the node-label playbook.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use kismet_db::models::{Node, Plan};

/// Labels per inventory hostname.
pub type HostLabels = BTreeMap<String, BTreeMap<String, String>>;

/// Label sets for every provisioned host that has any.
///
/// Placeholders and hosts without labels are skipped. A host appearing in
/// more than one group gets the union of its labels, later groups winning
/// on key clashes.
pub fn host_labels(plan: &Plan) -> HostLabels {
    let groups: [&[Node]; 4] = [
        &plan.etcd.nodes,
        &plan.master.nodes,
        &plan.worker.nodes,
        &plan.ingress.nodes,
    ];

    let mut out = HostLabels::new();
    for node in groups.into_iter().flatten() {
        if node.is_placeholder() || node.labels.is_empty() {
            continue;
        }
        out.entry(node.host.clone())
            .or_default()
            .extend(node.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    out
}

/// Extra vars for the playbook run. Labels are applied with overwrite.
pub fn playbook_vars(plan: &Plan) -> Value {
    json!({
        "node_labels": host_labels(plan),
        "overwrite": true,
    })
}
