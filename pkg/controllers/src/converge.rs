use chrono::{DateTime, Utc};

use pkg_constants::annotations::CONTROLLER_LAST_UPDATED_ANNOTATION_KEY;
use pkg_state::client::{ApiError, ChildApi, Object};
use pkg_types::configmap::ConfigMap;
use pkg_types::credentials::PlatformCredentialsSet;
use pkg_types::deployment::Deployment;
use pkg_types::hpa::HorizontalAutoscaler;
use pkg_types::ingress::Ingress;
use pkg_types::routegroup::RouteGroup;
use pkg_types::secret::Secret;
use pkg_types::service::Service;

/// Child resource kinds the generic converger can diff. The spec-level
/// comparison is desired-is-subset-compatible: generated specs are fully
/// populated, so field equality is the comparison.
pub trait Convergeable: Object {
    fn same_spec(&self, existing: &Self) -> bool;

    /// Carries forward status written by other actors when the converger
    /// overwrites an object. Kinds without a status block need nothing.
    fn preserve_status(&mut self, _existing: &Self) {}
}

macro_rules! impl_convergeable_spec {
    ($ty:ty) => {
        impl Convergeable for $ty {
            fn same_spec(&self, existing: &Self) -> bool {
                self.spec == existing.spec
            }
        }
    };
    ($ty:ty, status) => {
        impl Convergeable for $ty {
            fn same_spec(&self, existing: &Self) -> bool {
                self.spec == existing.spec
            }

            fn preserve_status(&mut self, existing: &Self) {
                self.status = existing.status.clone();
            }
        }
    };
}

impl_convergeable_spec!(Deployment, status);
impl_convergeable_spec!(HorizontalAutoscaler, status);
impl_convergeable_spec!(Service);
impl_convergeable_spec!(Ingress);
impl_convergeable_spec!(RouteGroup);
impl_convergeable_spec!(PlatformCredentialsSet);

impl Convergeable for ConfigMap {
    fn same_spec(&self, existing: &Self) -> bool {
        self.data == existing.data
    }
}

impl Convergeable for Secret {
    fn same_spec(&self, existing: &Self) -> bool {
        self.data == existing.data
    }
}

/// What the converger did for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

/// One generalized create-or-update step, applied once per resource kind
/// per owner. Creates a missing object, rewrites a drifted one, and does
/// nothing when desired already matches — the common case every tick. The
/// comparison ignores the controller's updated-timestamp marker; labels and
/// all other annotations must match exactly. Never deletes: removal of a
/// child is solely an effect of its owning Stack being deleted.
pub async fn converge<T, C>(
    client: &C,
    existing: Option<&T>,
    desired: Option<T>,
    now: DateTime<Utc>,
) -> Result<Outcome, ApiError>
where
    T: Convergeable,
    C: ChildApi<T> + ?Sized,
{
    let Some(mut desired) = desired else {
        // Nothing to apply; an existing object is left alone.
        return Ok(Outcome::Unchanged);
    };

    let Some(existing) = existing else {
        desired.metadata_mut().annotations.insert(
            CONTROLLER_LAST_UPDATED_ANNOTATION_KEY.to_string(),
            now.to_rfc3339(),
        );
        client.create(&desired).await?;
        return Ok(Outcome::Created);
    };

    let mut existing_annotations = existing.metadata().annotations.clone();
    let had_marker = existing_annotations
        .remove(CONTROLLER_LAST_UPDATED_ANNOTATION_KEY)
        .is_some();

    if had_marker
        && desired.same_spec(existing)
        && desired.metadata().labels == existing.metadata().labels
        && desired.metadata().annotations == existing_annotations
    {
        return Ok(Outcome::Unchanged);
    }

    desired.preserve_status(existing);
    {
        let existing_meta = existing.metadata();
        let (uid, resource_version, created_at) = (
            existing_meta.uid.clone(),
            existing_meta.resource_version,
            existing_meta.created_at,
        );
        let meta = desired.metadata_mut();
        meta.uid = uid;
        meta.resource_version = resource_version;
        meta.created_at = created_at;
        meta.annotations.insert(
            CONTROLLER_LAST_UPDATED_ANNOTATION_KEY.to_string(),
            now.to_rfc3339(),
        );
    }
    client.update(&desired).await?;
    Ok(Outcome::Updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_state::store::InMemoryApi;
    use pkg_types::metadata::ObjectMeta;
    use pkg_types::service::{ServicePort, ServiceSpec};

    fn make_service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta::new(name, "default"),
            spec: ServiceSpec {
                selector: Default::default(),
                ports: vec![ServicePort {
                    name: "http".to_string(),
                    port: 80,
                    target_port: 8080,
                }],
            },
        }
    }

    #[tokio::test]
    async fn creates_missing_object_with_marker() {
        let api = InMemoryApi::new();
        let outcome = converge(&api, None, Some(make_service("svc")), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Created);

        let stored: Vec<Service> = api.list("default").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(
            stored[0]
                .metadata
                .annotations
                .contains_key(CONTROLLER_LAST_UPDATED_ANNOTATION_KEY)
        );
    }

    #[tokio::test]
    async fn unchanged_object_causes_zero_writes() {
        let api = InMemoryApi::new();
        converge(&api, None, Some(make_service("svc")), Utc::now())
            .await
            .unwrap();
        let stored: Vec<Service> = api.list("default").await.unwrap();
        let version_after_create = stored[0].metadata.resource_version;

        let outcome = converge(&api, Some(&stored[0]), Some(make_service("svc")), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);

        let stored: Vec<Service> = api.list("default").await.unwrap();
        assert_eq!(stored[0].metadata.resource_version, version_after_create);
    }

    #[tokio::test]
    async fn drifted_spec_is_overwritten_and_marker_refreshed() {
        let api = InMemoryApi::new();
        converge(&api, None, Some(make_service("svc")), Utc::now())
            .await
            .unwrap();
        let stored: Vec<Service> = api.list("default").await.unwrap();
        let before = stored[0].metadata.annotations[CONTROLLER_LAST_UPDATED_ANNOTATION_KEY].clone();

        let mut desired = make_service("svc");
        desired.spec.ports[0].target_port = 9090;
        let later = Utc::now() + chrono::Duration::seconds(30);
        let outcome = converge(&api, Some(&stored[0]), Some(desired), later)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Updated);

        let stored: Vec<Service> = api.list("default").await.unwrap();
        assert_eq!(stored[0].spec.ports[0].target_port, 9090);
        assert_ne!(
            stored[0].metadata.annotations[CONTROLLER_LAST_UPDATED_ANNOTATION_KEY],
            before
        );
    }

    #[tokio::test]
    async fn object_without_marker_is_readopted() {
        let api = InMemoryApi::new();
        // Simulates a resource that predates the marker convention.
        let legacy = api.create(&make_service("svc")).await.unwrap();

        let outcome = converge(&api, Some(&legacy), Some(make_service("svc")), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Updated);

        let stored: Vec<Service> = api.list("default").await.unwrap();
        assert!(
            stored[0]
                .metadata
                .annotations
                .contains_key(CONTROLLER_LAST_UPDATED_ANNOTATION_KEY)
        );
    }

    #[tokio::test]
    async fn update_preserves_externally_written_status() {
        let api = InMemoryApi::new();
        let mut deployment = Deployment {
            metadata: ObjectMeta::new("app-v1", "default"),
            spec: pkg_types::deployment::DeploymentSpec {
                replicas: 2,
                template: Default::default(),
                selector: Default::default(),
            },
            status: Default::default(),
        };
        converge(&api, None, Some(deployment.clone()), Utc::now())
            .await
            .unwrap();

        // Another controller reports readiness.
        let mut stored: Vec<Deployment> = api.list("default").await.unwrap();
        stored[0].status.ready_replicas = 2;
        let stored = api.update(&stored[0]).await.unwrap();

        deployment.spec.replicas = 3;
        converge(&api, Some(&stored), Some(deployment), Utc::now())
            .await
            .unwrap();

        let stored: Vec<Deployment> = api.list("default").await.unwrap();
        assert_eq!(stored[0].spec.replicas, 3);
        assert_eq!(stored[0].status.ready_replicas, 2);
    }
}
