use serde::{Deserialize, Serialize};

use crate::metadata::ObjectMeta;

/// One weighted backend of a route group. Weights on a stackset-level route
/// group express the actual traffic split directly in the spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteGroupBackend {
    pub name: String,
    pub service_name: String,
    pub service_port: u16,
    #[serde(default)]
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteGroupRoute {
    pub path_subtree: String,
    #[serde(default)]
    pub backends: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteGroupSpec {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub backends: Vec<RouteGroupBackend>,
    #[serde(default)]
    pub routes: Vec<RouteGroupRoute>,
}

/// Route group resource, the richer alternative to Ingress for weighted
/// routing. Support is feature-flagged in the controller config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteGroup {
    pub metadata: ObjectMeta,
    pub spec: RouteGroupSpec,
}
