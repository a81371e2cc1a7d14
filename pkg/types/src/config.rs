use serde::{Deserialize, Serialize};

/// Controller configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// namespace: production
/// controller-id: blue
/// interval-secs: 10
/// reconcile-workers: 10
/// enable-route-groups: true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigFile {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, alias = "controller-id")]
    pub controller_id: Option<String>,
    #[serde(default, alias = "interval-secs")]
    pub interval_secs: Option<u64>,
    #[serde(default, alias = "reconcile-workers")]
    pub reconcile_workers: Option<usize>,
    #[serde(default, alias = "probe-addr")]
    pub probe_addr: Option<String>,
    #[serde(default, alias = "backend-weights-annotation-key")]
    pub backend_weights_annotation_key: Option<String>,
    #[serde(default, alias = "enable-route-groups")]
    pub enable_route_groups: Option<bool>,
    #[serde(default, alias = "enable-config-maps")]
    pub enable_config_maps: Option<bool>,
    #[serde(default, alias = "enable-secrets")]
    pub enable_secrets: Option<bool>,
    #[serde(default, alias = "enable-credentials-sets")]
    pub enable_credentials_sets: Option<bool>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
