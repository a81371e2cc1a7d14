use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingress::IngressSpec;
use crate::metadata::ObjectMeta;
use crate::routegroup::RouteGroupSpec;
use crate::stack::StackSpec;

// --- Traffic ---

/// Traffic weight configured by the user for one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredTraffic {
    pub stack_name: String,
    pub weight: f64,
}

/// Traffic weight currently applied to one stack, as observed on the
/// shared routing object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualTraffic {
    pub stack_name: String,
    pub weight: f64,
}

// --- Stack template ---

/// Template for the next Stack of a StackSet. Advancing `version` makes the
/// controller cut a new Stack named `<stackset>-<version>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackTemplate {
    pub version: String,
    pub spec: StackSpec,
}

// --- Lifecycle policy ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackLifecycle {
    /// How many retired zero-traffic stacks to keep around.
    #[serde(default)]
    pub history_limit: Option<usize>,
}

// --- StackSet spec ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSetSpec {
    pub stack_template: StackTemplate,
    /// Desired traffic split across stacks. Weights are normalized to 100.
    #[serde(default)]
    pub traffic: Vec<DesiredTraffic>,
    /// Shared ingress template. Absent means no stackset-level ingress.
    #[serde(default)]
    pub ingress: Option<IngressSpec>,
    /// Shared route group template.
    #[serde(default)]
    pub route_group: Option<RouteGroupSpec>,
    #[serde(default)]
    pub stack_lifecycle: StackLifecycle,
}

// --- StackSet status ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackSetStatus {
    /// Last stack template version a Stack was created for. Guards against
    /// creating duplicate stacks for the same revision.
    #[serde(default)]
    pub observed_stack_version: String,
    #[serde(default)]
    pub stacks: u32,
    #[serde(default)]
    pub ready_stacks: u32,
    #[serde(default)]
    pub stacks_with_traffic: u32,
    #[serde(default)]
    pub traffic: Vec<ActualTraffic>,
}

// --- StackSet ---

/// Desired-state root resource describing a family of versioned deployments
/// and their traffic split. The controller only reads the spec and writes
/// the status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSet {
    pub metadata: ObjectMeta,
    pub spec: StackSetSpec,
    #[serde(default)]
    pub status: StackSetStatus,
}

impl StackSet {
    pub fn created_at(&self) -> DateTime<Utc> {
        self.metadata.created_at
    }
}
