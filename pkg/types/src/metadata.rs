use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Back-reference from a child resource to its exclusive owning object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// Common metadata carried by every resource the controller reads or writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    /// Bumped by the store on every write; used for optimistic concurrency.
    #[serde(default)]
    pub resource_version: u64,
    pub created_at: DateTime<Utc>,
}

impl ObjectMeta {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            uid: String::new(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            owner_references: Vec::new(),
            resource_version: 0,
            created_at: Utc::now(),
        }
    }

    /// The owning object's UID, but only when ownership is unambiguous.
    /// Resources with zero or multiple owner references are never attached
    /// to any index entry.
    pub fn owner_uid(&self) -> Option<&str> {
        match self.owner_references.as_slice() {
            [single] => Some(single.uid.as_str()),
            _ => None,
        }
    }

    pub fn owned_by(mut self, kind: &str, name: &str, uid: &str) -> Self {
        self.owner_references.push(OwnerReference {
            kind: kind.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_uid_requires_exactly_one_reference() {
        let meta = ObjectMeta::new("child", "default");
        assert_eq!(meta.owner_uid(), None);

        let meta = ObjectMeta::new("child", "default").owned_by("Stack", "app-v1", "uid-1");
        assert_eq!(meta.owner_uid(), Some("uid-1"));

        let meta = ObjectMeta::new("child", "default")
            .owned_by("Stack", "app-v1", "uid-1")
            .owned_by("Stack", "app-v2", "uid-2");
        assert_eq!(meta.owner_uid(), None);
    }
}
