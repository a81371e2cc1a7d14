use serde::{Deserialize, Serialize};

use crate::metadata::ObjectMeta;

/// Autoscaler bounds declared in a Stack spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalerPolicy {
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Target average CPU utilization (percentage, e.g. 80 = 80%)
    #[serde(default)]
    pub cpu_utilization_percent: Option<u32>,
}

// --- HPA status ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoscalerStatus {
    #[serde(default)]
    pub current_replicas: u32,
    #[serde(default)]
    pub desired_replicas: u32,
}

// --- HPA spec ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalerSpec {
    /// Name of the deployment this autoscaler targets.
    pub target: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    #[serde(default)]
    pub cpu_utilization_percent: Option<u32>,
}

// --- HPA ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizontalAutoscaler {
    pub metadata: ObjectMeta,
    pub spec: AutoscalerSpec,
    #[serde(default)]
    pub status: AutoscalerStatus,
}
