use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::metadata::ObjectMeta;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub name: String,
    #[serde(default)]
    pub privileges: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialsSpec {
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub tokens: HashMap<String, TokenGrant>,
}

/// Credential set provisioned for a Stack's workload identity. Managed like
/// any other child resource; support is feature-flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformCredentialsSet {
    pub metadata: ObjectMeta,
    pub spec: CredentialsSpec,
}
