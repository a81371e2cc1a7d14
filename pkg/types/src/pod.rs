use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- Resource requirements ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceRequirements {
    /// CPU in millicores (1000 = 1 core)
    #[serde(default)]
    pub cpu_millis: u64,
    /// Memory in bytes
    #[serde(default)]
    pub memory_bytes: u64,
}

// --- Container spec ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Names of ConfigMaps mounted into the container environment.
    #[serde(default)]
    pub config_map_refs: Vec<String>,
    /// Names of Secrets mounted into the container environment.
    #[serde(default)]
    pub secret_refs: Vec<String>,
}

// --- Pod template ---

/// Template for the pods a Stack's deployment runs. Embedded in the Stack
/// spec and copied verbatim into the generated Deployment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PodTemplate {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}
