use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::metadata::ObjectMeta;

/// Path matching type for Ingress rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PathType {
    #[default]
    Prefix,
    Exact,
}

/// Backend service target for an Ingress path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressBackend {
    pub service_name: String,
    pub service_port: u16,
}

/// A single path rule within an Ingress HTTP rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressPath {
    pub path: String,
    #[serde(default)]
    pub path_type: PathType,
    pub backend: IngressBackend,
}

/// A single host-based Ingress rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressRule {
    pub host: String,
    pub paths: Vec<IngressPath>,
}

/// Ingress specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressSpec {
    #[serde(default)]
    pub rules: Vec<IngressRule>,
}

/// Ingress resource for external traffic routing. The actual backend
/// weights of a stackset-level ingress live in an annotation as a JSON map
/// of stack name to weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingress {
    pub metadata: ObjectMeta,
    pub spec: IngressSpec,
}

/// Decodes the backend-weights annotation, tolerating absence.
pub fn backend_weights(
    annotations: &HashMap<String, String>,
    key: &str,
) -> HashMap<String, f64> {
    annotations
        .get(key)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_weights_parses_annotation() {
        let mut annotations = HashMap::new();
        annotations.insert(
            "weights".to_string(),
            r#"{"app-v1": 80.0, "app-v2": 20.0}"#.to_string(),
        );
        let weights = backend_weights(&annotations, "weights");
        assert_eq!(weights.get("app-v1"), Some(&80.0));
        assert_eq!(weights.get("app-v2"), Some(&20.0));
    }

    #[test]
    fn backend_weights_missing_or_malformed_is_empty() {
        let mut annotations = HashMap::new();
        assert!(backend_weights(&annotations, "weights").is_empty());

        annotations.insert("weights".to_string(), "not-json".to_string());
        assert!(backend_weights(&annotations, "weights").is_empty());
    }
}
