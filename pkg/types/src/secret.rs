use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::metadata::ObjectMeta;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    /// Secret data stored as base64-encoded values.
    #[serde(default)]
    pub data: HashMap<String, String>,
}
