use async_trait::async_trait;
use thiserror::Error;

use pkg_types::configmap::ConfigMap;
use pkg_types::credentials::PlatformCredentialsSet;
use pkg_types::deployment::Deployment;
use pkg_types::hpa::HorizontalAutoscaler;
use pkg_types::ingress::Ingress;
use pkg_types::metadata::ObjectMeta;
use pkg_types::routegroup::RouteGroup;
use pkg_types::secret::Secret;
use pkg_types::service::Service;
use pkg_types::stack::Stack;
use pkg_types::stackset::StackSet;

/// Error surface of the resource store. `Conflict` drives the
/// optimistic-concurrency retry loop in the status writer and must stay
/// distinguishable from the other variants.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{kind} {namespace}/{name}: conflict, object changed concurrently")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name}: not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name}: already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }
}

/// Uniform metadata access for every resource kind the store holds.
pub trait Object: Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}

macro_rules! impl_object {
    ($ty:ty, $kind:literal) => {
        impl Object for $ty {
            const KIND: &'static str = $kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

impl_object!(StackSet, "StackSet");
impl_object!(Stack, "Stack");
impl_object!(Deployment, "Deployment");
impl_object!(Service, "Service");
impl_object!(HorizontalAutoscaler, "HorizontalAutoscaler");
impl_object!(Ingress, "Ingress");
impl_object!(RouteGroup, "RouteGroup");
impl_object!(ConfigMap, "ConfigMap");
impl_object!(Secret, "Secret");
impl_object!(PlatformCredentialsSet, "PlatformCredentialsSet");

/// Child resource kinds the converger can create or update. One generalized
/// create-or-update routine works against any implementation.
#[async_trait]
pub trait ChildApi<T: Object>: Send + Sync {
    async fn list(&self, namespace: &str) -> Result<Vec<T>, ApiError>;
    async fn create(&self, obj: &T) -> Result<T, ApiError>;
    async fn update(&self, obj: &T) -> Result<T, ApiError>;
}

/// Typed client against the control-plane API, one list per kind per tick.
/// The wire protocol behind it is out of scope; see `store::InMemoryApi`
/// for the in-process implementation backing tests and local runs.
#[async_trait]
pub trait ApiClient:
    ChildApi<Deployment>
    + ChildApi<Service>
    + ChildApi<HorizontalAutoscaler>
    + ChildApi<Ingress>
    + ChildApi<RouteGroup>
    + ChildApi<ConfigMap>
    + ChildApi<Secret>
    + ChildApi<PlatformCredentialsSet>
    + Send
    + Sync
{
    async fn list_stack_sets(&self, namespace: &str) -> Result<Vec<StackSet>, ApiError>;
    async fn get_stack_set(&self, namespace: &str, name: &str) -> Result<StackSet, ApiError>;
    async fn update_stack_set(&self, stackset: &StackSet) -> Result<StackSet, ApiError>;
    async fn update_stack_set_status(&self, stackset: &StackSet) -> Result<StackSet, ApiError>;

    async fn list_stacks(&self, namespace: &str) -> Result<Vec<Stack>, ApiError>;
    async fn get_stack(&self, namespace: &str, name: &str) -> Result<Stack, ApiError>;
    async fn create_stack(&self, stack: &Stack) -> Result<Stack, ApiError>;
    async fn update_stack_status(&self, stack: &Stack) -> Result<Stack, ApiError>;
    async fn delete_stack(&self, namespace: &str, name: &str) -> Result<(), ApiError>;
}
