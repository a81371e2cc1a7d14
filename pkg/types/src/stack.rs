use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hpa::AutoscalerPolicy;
use crate::metadata::ObjectMeta;
use crate::pod::PodTemplate;
use crate::service::ServicePort;

// --- Configuration resource references ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigurationResourceKind {
    ConfigMap,
    Secret,
    PlatformCredentialsSet,
}

/// Reference to an external configuration object consumed by the Stack's
/// pod template. The referenced name must be prefixed by the Stack name so
/// a generated resource can never alias one belonging to another Stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationResourceRef {
    pub kind: ConfigurationResourceKind,
    pub name: String,
}

// --- Stack spec ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSpec {
    pub replicas: u32,
    #[serde(default)]
    pub pod_template: PodTemplate,
    /// Ports exposed by the generated per-stack Service.
    #[serde(default)]
    pub service_ports: Vec<ServicePort>,
    /// Optional autoscaler; when present a HorizontalAutoscaler is generated
    /// and its minimum may be raised by the prescaling reconciler.
    #[serde(default)]
    pub autoscaler: Option<AutoscalerPolicy>,
    #[serde(default)]
    pub configuration_resources: Vec<ConfigurationResourceRef>,
}

// --- Prescaling status ---

/// Persisted state of the prescaling state machine. Lives in the Stack
/// status because the in-memory model is rebuilt from scratch every tick
/// and must survive controller restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrescalingStatus {
    #[serde(default)]
    pub active: bool,
    /// Minimum replica floor applied while prescaling is active.
    #[serde(default)]
    pub replicas: u32,
    /// Weight the stack was serving before the increase started. Used to
    /// decide whether an early decrease returns the stack to idle.
    #[serde(default)]
    pub baseline_weight: f64,
    /// The floor is held until this instant. Refreshed to now + reset delay
    /// on every further weight increase.
    #[serde(default)]
    pub reset_deadline: Option<DateTime<Utc>>,
}

// --- Stack status ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackStatus {
    #[serde(default)]
    pub desired_traffic_weight: f64,
    #[serde(default)]
    pub actual_traffic_weight: f64,
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
    #[serde(default)]
    pub updated_replicas: u32,
    /// Set when the stack stopped receiving traffic; cleared when traffic
    /// returns. Drives the retention policy.
    #[serde(default)]
    pub no_traffic_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prescaling: PrescalingStatus,
}

// --- Stack ---

/// One versioned, independently scalable deployment unit belonging to
/// exactly one StackSet via an owner reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    pub metadata: ObjectMeta,
    pub spec: StackSpec,
    #[serde(default)]
    pub status: StackStatus,
}

impl Stack {
    pub fn created_at(&self) -> DateTime<Utc> {
        self.metadata.created_at
    }
}
