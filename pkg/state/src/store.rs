use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use pkg_types::configmap::ConfigMap;
use pkg_types::credentials::PlatformCredentialsSet;
use pkg_types::deployment::Deployment;
use pkg_types::hpa::HorizontalAutoscaler;
use pkg_types::ingress::Ingress;
use pkg_types::routegroup::RouteGroup;
use pkg_types::secret::Secret;
use pkg_types::service::Service;
use pkg_types::stack::Stack;
use pkg_types::stackset::StackSet;

use crate::client::{ApiClient, ApiError, ChildApi, Object};
use crate::watch::{EventType, WatchFeed};

/// In-process resource store implementing the `ApiClient` interface with
/// per-object resource versions and conflict detection. Backs the test
/// suite and local runs; a networked client slots in behind the same trait.
pub struct InMemoryApi {
    inner: RwLock<Kinds>,
    version: AtomicU64,
    watch: WatchFeed,
}

#[derive(Default)]
struct Kinds {
    stack_sets: HashMap<String, StackSet>,
    stacks: HashMap<String, Stack>,
    deployments: HashMap<String, Deployment>,
    services: HashMap<String, Service>,
    autoscalers: HashMap<String, HorizontalAutoscaler>,
    ingresses: HashMap<String, Ingress>,
    route_groups: HashMap<String, RouteGroup>,
    config_maps: HashMap<String, ConfigMap>,
    secrets: HashMap<String, Secret>,
    credentials_sets: HashMap<String, PlatformCredentialsSet>,
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

fn list_kind<T: Object>(map: &HashMap<String, T>, namespace: &str) -> Vec<T> {
    let mut items: Vec<T> = map
        .values()
        .filter(|o| o.metadata().namespace == namespace)
        .cloned()
        .collect();
    // Stable listing order keeps ticks deterministic.
    items.sort_by(|a, b| a.metadata().name.cmp(&b.metadata().name));
    items
}

fn get_kind<T: Object>(
    map: &HashMap<String, T>,
    namespace: &str,
    name: &str,
) -> Result<T, ApiError> {
    map.get(&key(namespace, name))
        .cloned()
        .ok_or_else(|| ApiError::NotFound {
            kind: T::KIND,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
}

fn create_kind<T: Object>(map: &mut HashMap<String, T>, obj: &T, version: u64) -> Result<T, ApiError> {
    let k = key(&obj.metadata().namespace, &obj.metadata().name);
    if map.contains_key(&k) {
        return Err(ApiError::AlreadyExists {
            kind: T::KIND,
            namespace: obj.metadata().namespace.clone(),
            name: obj.metadata().name.clone(),
        });
    }
    let mut stored = obj.clone();
    {
        let meta = stored.metadata_mut();
        if meta.uid.is_empty() {
            meta.uid = Uuid::new_v4().to_string();
        }
        meta.resource_version = version;
    }
    map.insert(k, stored.clone());
    Ok(stored)
}

fn update_kind<T: Object>(map: &mut HashMap<String, T>, obj: &T, version: u64) -> Result<T, ApiError> {
    let k = key(&obj.metadata().namespace, &obj.metadata().name);
    let existing = map.get(&k).ok_or_else(|| ApiError::NotFound {
        kind: T::KIND,
        namespace: obj.metadata().namespace.clone(),
        name: obj.metadata().name.clone(),
    })?;
    if existing.metadata().resource_version != obj.metadata().resource_version {
        return Err(ApiError::Conflict {
            kind: T::KIND,
            namespace: obj.metadata().namespace.clone(),
            name: obj.metadata().name.clone(),
        });
    }
    let (uid, created_at) = (
        existing.metadata().uid.clone(),
        existing.metadata().created_at,
    );
    let mut stored = obj.clone();
    {
        let meta = stored.metadata_mut();
        meta.uid = uid;
        meta.created_at = created_at;
        meta.resource_version = version;
    }
    map.insert(k, stored.clone());
    Ok(stored)
}

impl InMemoryApi {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Kinds::default()),
            version: AtomicU64::new(0),
            watch: WatchFeed::new(1024),
        }
    }

    /// The watch feed fed by StackSet mutations on this store.
    pub fn watch_feed(&self) -> WatchFeed {
        self.watch.clone()
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Seed or externally create a StackSet, publishing a watch event the
    /// way the control plane would.
    pub async fn create_stack_set(&self, stackset: &StackSet) -> Result<StackSet, ApiError> {
        let version = self.next_version();
        let mut kinds = self.inner.write().await;
        let created = create_kind(&mut kinds.stack_sets, stackset, version)?;
        self.watch.notify(EventType::Added, &created);
        Ok(created)
    }

    /// Externally delete a StackSet, publishing a watch event.
    pub async fn delete_stack_set(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let mut kinds = self.inner.write().await;
        match kinds.stack_sets.remove(&key(namespace, name)) {
            Some(removed) => {
                self.watch.notify(EventType::Deleted, &removed);
                Ok(())
            }
            None => Err(ApiError::NotFound {
                kind: StackSet::KIND,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

impl Default for InMemoryApi {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! impl_child_api {
    ($ty:ty, $field:ident) => {
        #[async_trait]
        impl ChildApi<$ty> for InMemoryApi {
            async fn list(&self, namespace: &str) -> Result<Vec<$ty>, ApiError> {
                Ok(list_kind(&self.inner.read().await.$field, namespace))
            }

            async fn create(&self, obj: &$ty) -> Result<$ty, ApiError> {
                let version = self.next_version();
                create_kind(&mut self.inner.write().await.$field, obj, version)
            }

            async fn update(&self, obj: &$ty) -> Result<$ty, ApiError> {
                let version = self.next_version();
                update_kind(&mut self.inner.write().await.$field, obj, version)
            }
        }
    };
}

impl_child_api!(Deployment, deployments);
impl_child_api!(Service, services);
impl_child_api!(HorizontalAutoscaler, autoscalers);
impl_child_api!(Ingress, ingresses);
impl_child_api!(RouteGroup, route_groups);
impl_child_api!(ConfigMap, config_maps);
impl_child_api!(Secret, secrets);
impl_child_api!(PlatformCredentialsSet, credentials_sets);

#[async_trait]
impl ApiClient for InMemoryApi {
    async fn list_stack_sets(&self, namespace: &str) -> Result<Vec<StackSet>, ApiError> {
        Ok(list_kind(&self.inner.read().await.stack_sets, namespace))
    }

    async fn get_stack_set(&self, namespace: &str, name: &str) -> Result<StackSet, ApiError> {
        get_kind(&self.inner.read().await.stack_sets, namespace, name)
    }

    async fn update_stack_set(&self, stackset: &StackSet) -> Result<StackSet, ApiError> {
        let version = self.next_version();
        let mut kinds = self.inner.write().await;
        let updated = update_kind(&mut kinds.stack_sets, stackset, version)?;
        self.watch.notify(EventType::Updated, &updated);
        Ok(updated)
    }

    async fn update_stack_set_status(&self, stackset: &StackSet) -> Result<StackSet, ApiError> {
        let version = self.next_version();
        let mut kinds = self.inner.write().await;
        let k = key(&stackset.metadata.namespace, &stackset.metadata.name);
        let existing = kinds.stack_sets.get(&k).ok_or_else(|| ApiError::NotFound {
            kind: StackSet::KIND,
            namespace: stackset.metadata.namespace.clone(),
            name: stackset.metadata.name.clone(),
        })?;
        if existing.metadata.resource_version != stackset.metadata.resource_version {
            return Err(ApiError::Conflict {
                kind: StackSet::KIND,
                namespace: stackset.metadata.namespace.clone(),
                name: stackset.metadata.name.clone(),
            });
        }
        let mut stored = existing.clone();
        stored.status = stackset.status.clone();
        stored.metadata.resource_version = version;
        kinds.stack_sets.insert(k, stored.clone());
        // Status changes reach watchers too, like any other update.
        self.watch.notify(EventType::Updated, &stored);
        Ok(stored)
    }

    async fn list_stacks(&self, namespace: &str) -> Result<Vec<Stack>, ApiError> {
        Ok(list_kind(&self.inner.read().await.stacks, namespace))
    }

    async fn get_stack(&self, namespace: &str, name: &str) -> Result<Stack, ApiError> {
        get_kind(&self.inner.read().await.stacks, namespace, name)
    }

    async fn create_stack(&self, stack: &Stack) -> Result<Stack, ApiError> {
        let version = self.next_version();
        create_kind(&mut self.inner.write().await.stacks, stack, version)
    }

    async fn update_stack_status(&self, stack: &Stack) -> Result<Stack, ApiError> {
        let version = self.next_version();
        let mut kinds = self.inner.write().await;
        let k = key(&stack.metadata.namespace, &stack.metadata.name);
        let existing = kinds.stacks.get(&k).ok_or_else(|| ApiError::NotFound {
            kind: Stack::KIND,
            namespace: stack.metadata.namespace.clone(),
            name: stack.metadata.name.clone(),
        })?;
        if existing.metadata.resource_version != stack.metadata.resource_version {
            return Err(ApiError::Conflict {
                kind: Stack::KIND,
                namespace: stack.metadata.namespace.clone(),
                name: stack.metadata.name.clone(),
            });
        }
        let mut stored = existing.clone();
        stored.status = stack.status.clone();
        stored.metadata.resource_version = version;
        kinds.stacks.insert(k, stored.clone());
        Ok(stored)
    }

    async fn delete_stack(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let mut kinds = self.inner.write().await;
        match kinds.stacks.remove(&key(namespace, name)) {
            Some(_) => Ok(()),
            None => Err(ApiError::NotFound {
                kind: Stack::KIND,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }
}
