use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::metadata::ObjectMeta;
use crate::pod::PodTemplate;

// --- Deployment status ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
    #[serde(default)]
    pub updated_replicas: u32,
}

// --- Deployment spec ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub replicas: u32,
    pub template: PodTemplate,
    /// Label selector for matching pods
    #[serde(default)]
    pub selector: HashMap<String, String>,
}

// --- Deployment ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub metadata: ObjectMeta,
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub status: DeploymentStatus,
}
