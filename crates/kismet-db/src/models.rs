use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Operator-declared target state of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Installed,
    Destroyed,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Installed => "installed",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

impl FromStr for DesiredState {
    type Err = DesiredStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installed" => Ok(Self::Installed),
            "destroyed" => Ok(Self::Destroyed),
            other => Err(DesiredStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`DesiredState`] string.
#[derive(Debug, Clone)]
pub struct DesiredStateParseError(pub String);

impl fmt::Display for DesiredStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid desired state: {:?}", self.0)
    }
}

impl std::error::Error for DesiredStateParseError {}

// ---------------------------------------------------------------------------

/// Last state of a cluster as reported by the reconciler.
///
/// The API only ever writes [`CurrentState::Planned`] (on create). Every
/// other value is set by the reconciler as it converges infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CurrentState {
    Planned,
    Provisioning,
    Provisioned,
    Installing,
    Installed,
    Modifying,
    Destroying,
    Destroyed,
    Error,
}

impl CurrentState {
    /// Whether the reconciler has finished with this cluster for the current
    /// desired state.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Installed | Self::Destroyed | Self::Error)
    }
}

impl fmt::Display for CurrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planned => "planned",
            Self::Provisioning => "provisioning",
            Self::Provisioned => "provisioned",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Modifying => "modifying",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for CurrentState {
    type Err = CurrentStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(Self::Planned),
            "provisioning" => Ok(Self::Provisioning),
            "provisioned" => Ok(Self::Provisioned),
            "installing" => Ok(Self::Installing),
            "installed" => Ok(Self::Installed),
            "modifying" => Ok(Self::Modifying),
            "destroying" => Ok(Self::Destroying),
            "destroyed" => Ok(Self::Destroyed),
            "error" => Ok(Self::Error),
            other => Err(CurrentStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`CurrentState`] string.
#[derive(Debug, Clone)]
pub struct CurrentStateParseError(pub String);

impl fmt::Display for CurrentStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid current state: {:?}", self.0)
    }
}

impl std::error::Error for CurrentStateParseError {}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Expanded infrastructure topology for one cluster.
///
/// `cluster.name` and `etcd.expected_count` are identity fields and never
/// change after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub cluster: ClusterMeta,
    pub etcd: NodeGroup,
    pub master: MasterNodeGroup,
    pub worker: NodeGroup,
    #[serde(default)]
    pub ingress: NodeGroup,
    pub provisioner: Provisioner,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMeta {
    pub name: String,
}

/// A group of hosts sharing one role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    pub expected_count: i32,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// The master group, which is fronted by a load balancer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterNodeGroup {
    pub expected_count: i32,
    /// Assigned by the reconciler once the load balancer exists.
    #[serde(default, rename = "loadBalancedFQDN")]
    pub load_balanced_fqdn: String,
    #[serde(default)]
    pub load_balanced_short_name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// One inventory host. Freshly planned nodes are placeholders with an empty
/// `host` until the provisioner fills them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default, rename = "internalIP")]
    pub internal_ip: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Node {
    /// Whether the provisioner has not yet assigned this node a host.
    pub fn is_placeholder(&self) -> bool {
        self.host.is_empty()
    }
}

/// Non-secret, provider-specific settings (region, image, ...).
pub type ProvisionerOptions = BTreeMap<String, String>;

/// Provisioner selection stored in the plan. Never holds secrets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provisioner {
    pub provider: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: ProvisionerOptions,
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Provider-specific secret material, keyed by field name (for AWS:
/// `accessKeyID` and `secretAccessKey`).
///
/// Stored next to the plan, never inside it. `Debug` prints key names only.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisionerCredentials(BTreeMap<String, String>);

impl ProvisionerCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ProvisionerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Cluster record
// ---------------------------------------------------------------------------

/// Everything the control plane knows about one cluster.
///
/// `can_continue` is the continuation gate: set on every accepted API
/// mutation, cleared by the reconciler when it picks the work up.
/// `generation` increases with every accepted mutation so that a clear can
/// be made conditional on the reconciler having seen the latest one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecord {
    pub name: String,
    pub desired_state: DesiredState,
    pub current_state: CurrentState,
    pub plan: Plan,
    #[serde(default)]
    pub credentials: ProvisionerCredentials,
    pub can_continue: bool,
    pub generation: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClusterRecord {
    /// A freshly accepted record: `planned`, gate set, first generation.
    pub fn planned(
        name: impl Into<String>,
        desired_state: DesiredState,
        plan: Plan,
        credentials: ProvisionerCredentials,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            desired_state,
            current_state: CurrentState::Planned,
            plan,
            credentials,
            can_continue: true,
            generation: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record an accepted mutation: set the gate and bump the generation.
    pub fn mark_mutated(&mut self) {
        self.can_continue = true;
        self.generation += 1;
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
