use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::metadata::ObjectMeta;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: HashMap<String, String>,
}
