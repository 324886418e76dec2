//! Parameterized plan template.
//!
//! [`render_plan_template`] writes a plan document with one placeholder
//! entry per requested node; [`expand_plan_template`] decodes it back into
//! a [`Plan`]. Placeholders have an empty host and ip until the provisioner
//! assigns them.

use kismet_db::models::Plan;

use super::PlanBuildError;

/// Group sizes and identity for a fresh plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanTemplateOptions {
    pub cluster_name: String,
    pub provider: String,
    pub etcd_nodes: u16,
    pub master_nodes: u16,
    pub worker_nodes: u16,
    pub ingress_nodes: u16,
}

/// Render the plan template as TOML.
pub fn render_plan_template(opts: &PlanTemplateOptions) -> String {
    let mut out = String::new();

    out.push_str("[cluster]\n");
    out.push_str(&format!("name = {}\n", toml_quote(&opts.cluster_name)));

    push_group(&mut out, "etcd", opts.etcd_nodes, &[]);
    push_group(
        &mut out,
        "master",
        opts.master_nodes,
        &["loadBalancedFQDN = \"\"", "loadBalancedShortName = \"\""],
    );
    push_group(&mut out, "worker", opts.worker_nodes, &[]);
    push_group(&mut out, "ingress", opts.ingress_nodes, &[]);

    out.push_str("\n[provisioner]\n");
    out.push_str(&format!("provider = {}\n", toml_quote(&opts.provider)));

    out
}

/// Render and decode the template into a [`Plan`].
pub fn expand_plan_template(opts: &PlanTemplateOptions) -> Result<Plan, PlanBuildError> {
    let rendered = render_plan_template(opts);
    let plan: Plan = toml::from_str(&rendered)?;
    Ok(plan)
}

fn push_group(out: &mut String, group: &str, count: u16, extra: &[&str]) {
    out.push('\n');
    out.push_str(&format!("[{group}]\n"));
    out.push_str(&format!("expectedCount = {count}\n"));
    for line in extra {
        out.push_str(line);
        out.push('\n');
    }
    for _ in 0..count {
        out.push('\n');
        out.push_str(&format!("[[{group}.nodes]]\n"));
        out.push_str("host = \"\"\n");
        out.push_str("ip = \"\"\n");
    }
}

fn toml_quote(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t");
    format!("\"{escaped}\"")
}
