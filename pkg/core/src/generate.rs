use std::collections::{BTreeMap, HashMap};

use pkg_constants::annotations::{
    CONTROLLER_LAST_UPDATED_ANNOTATION_KEY, TRAFFIC_SEGMENT_ANNOTATION_KEY,
};
use pkg_constants::names::SEGMENT_SUFFIX;
use pkg_types::configmap::ConfigMap;
use pkg_types::credentials::{CredentialsSpec, PlatformCredentialsSet};
use pkg_types::deployment::{Deployment, DeploymentSpec};
use pkg_types::hpa::{AutoscalerSpec, HorizontalAutoscaler};
use pkg_types::ingress::{Ingress, IngressBackend, IngressPath, IngressRule, IngressSpec};
use pkg_types::metadata::ObjectMeta;
use pkg_types::routegroup::{RouteGroup, RouteGroupBackend, RouteGroupSpec};
use pkg_types::secret::Secret;
use pkg_types::service::{Service, ServiceSpec};

use crate::WEIGHT_EPSILON;
use crate::container::{StackContainer, StackSetContainer};

fn stack_labels(sc: &StackContainer) -> HashMap<String, String> {
    let mut labels = sc.stack.metadata.labels.clone();
    labels.insert("stack".to_string(), sc.name().to_string());
    labels
}

fn child_meta(sc: &StackContainer, name: &str) -> ObjectMeta {
    let mut meta = ObjectMeta::new(name, sc.namespace()).owned_by(
        "Stack",
        sc.name(),
        &sc.stack.metadata.uid,
    );
    meta.labels = stack_labels(sc);
    meta
}

fn stackset_meta(ssc: &StackSetContainer, name: &str) -> ObjectMeta {
    let mut meta = ObjectMeta::new(name, ssc.namespace()).owned_by(
        "StackSet",
        ssc.name(),
        &ssc.stackset.metadata.uid,
    );
    meta.labels
        .insert("stackset".to_string(), ssc.name().to_string());
    meta
}

/// Desired deployment for a stack. Without an autoscaler the prescaling
/// floor is applied to the replica count directly; with one, the floor
/// lands on the autoscaler minimum instead.
pub fn deployment(sc: &StackContainer) -> Deployment {
    let mut replicas = sc.stack.spec.replicas;
    if sc.stack.spec.autoscaler.is_none() && sc.prescaling.active {
        replicas = replicas.max(sc.prescaling.replicas);
    }
    Deployment {
        metadata: child_meta(sc, sc.name()),
        spec: DeploymentSpec {
            replicas,
            template: sc.stack.spec.pod_template.clone(),
            selector: stack_labels(sc),
        },
        status: Default::default(),
    }
}

pub fn service(sc: &StackContainer) -> Service {
    Service {
        metadata: child_meta(sc, sc.name()),
        spec: ServiceSpec {
            selector: stack_labels(sc),
            ports: sc.stack.spec.service_ports.clone(),
        },
    }
}

pub fn autoscaler(sc: &StackContainer) -> Option<HorizontalAutoscaler> {
    let policy = sc.stack.spec.autoscaler.as_ref()?;
    let mut min_replicas = policy.min_replicas;
    if sc.prescaling.active {
        min_replicas = min_replicas
            .max(sc.prescaling.replicas)
            .min(policy.max_replicas);
    }
    Some(HorizontalAutoscaler {
        metadata: child_meta(sc, sc.name()),
        spec: AutoscalerSpec {
            target: sc.name().to_string(),
            min_replicas,
            max_replicas: policy.max_replicas,
            cpu_utilization_percent: policy.cpu_utilization_percent,
        },
        status: Default::default(),
    })
}

fn stack_rules(template: &IngressSpec, sc: &StackContainer) -> Vec<IngressRule> {
    template
        .rules
        .iter()
        .map(|rule| IngressRule {
            host: rule.host.clone(),
            paths: rule
                .paths
                .iter()
                .map(|path| IngressPath {
                    path: path.path.clone(),
                    path_type: path.path_type.clone(),
                    backend: IngressBackend {
                        service_name: sc.name().to_string(),
                        service_port: path.backend.service_port,
                    },
                })
                .collect(),
        })
        .collect()
}

/// Per-stack ingress: the shared template's rules pointed at this stack's
/// service. `None` when the StackSet defines no ingress.
pub fn ingress(ssc: &StackSetContainer, sc: &StackContainer) -> Option<Ingress> {
    let template = ssc.stackset.spec.ingress.as_ref()?;
    Some(Ingress {
        metadata: child_meta(sc, sc.name()),
        spec: IngressSpec {
            rules: stack_rules(template, sc),
        },
    })
}

/// Segment variant of the stack ingress, carrying the [lower, upper) slice
/// this stack serves. `None` until the planner assigned a segment.
pub fn ingress_segment(ssc: &StackSetContainer, sc: &StackContainer) -> Option<Ingress> {
    let template = ssc.stackset.spec.ingress.as_ref()?;
    let (lower, upper) = sc.segment_range?;
    let mut meta = child_meta(sc, &format!("{}{}", sc.name(), SEGMENT_SUFFIX));
    meta.annotations.insert(
        TRAFFIC_SEGMENT_ANNOTATION_KEY.to_string(),
        format!("{:.2}-{:.2}", lower, upper),
    );
    Some(Ingress {
        metadata: meta,
        spec: IngressSpec {
            rules: stack_rules(template, sc),
        },
    })
}

/// The stackset-level shared ingress. Actual per-stack weights ride along
/// in the backend-weights annotation as a JSON map.
pub fn stackset_ingress(ssc: &StackSetContainer) -> Option<Ingress> {
    let template = ssc.stackset.spec.ingress.as_ref()?;
    // BTreeMap keeps the annotation JSON byte-stable across ticks.
    let weights: BTreeMap<&str, f64> = ssc
        .stack_containers
        .values()
        .filter(|sc| sc.effective_traffic_weight > WEIGHT_EPSILON)
        .map(|sc| (sc.name(), sc.effective_traffic_weight))
        .collect();
    let mut meta = stackset_meta(ssc, ssc.name());
    meta.annotations.insert(
        ssc.backend_weights_annotation_key.clone(),
        serde_json::to_string(&weights).unwrap_or_default(),
    );
    Some(Ingress {
        metadata: meta,
        spec: template.clone(),
    })
}

fn route_group_backends(sc: &StackContainer, weight: f64) -> Vec<RouteGroupBackend> {
    let port = sc
        .stack
        .spec
        .service_ports
        .first()
        .map(|p| p.port)
        .unwrap_or(80);
    vec![RouteGroupBackend {
        name: sc.name().to_string(),
        service_name: sc.name().to_string(),
        service_port: port,
        weight,
    }]
}

pub fn route_group(ssc: &StackSetContainer, sc: &StackContainer) -> Option<RouteGroup> {
    let template = ssc.stackset.spec.route_group.as_ref()?;
    Some(RouteGroup {
        metadata: child_meta(sc, sc.name()),
        spec: RouteGroupSpec {
            hosts: template.hosts.clone(),
            backends: route_group_backends(sc, 100.0),
            routes: template.routes.clone(),
        },
    })
}

pub fn route_group_segment(ssc: &StackSetContainer, sc: &StackContainer) -> Option<RouteGroup> {
    let template = ssc.stackset.spec.route_group.as_ref()?;
    let (lower, upper) = sc.segment_range?;
    let mut meta = child_meta(sc, &format!("{}{}", sc.name(), SEGMENT_SUFFIX));
    meta.annotations.insert(
        TRAFFIC_SEGMENT_ANNOTATION_KEY.to_string(),
        format!("{:.2}-{:.2}", lower, upper),
    );
    Some(RouteGroup {
        metadata: meta,
        spec: RouteGroupSpec {
            hosts: template.hosts.clone(),
            backends: route_group_backends(sc, 100.0),
            routes: template.routes.clone(),
        },
    })
}

/// The stackset-level route group carries the live weights in its backend
/// list, one weighted backend per serving stack.
pub fn stackset_route_group(ssc: &StackSetContainer) -> Option<RouteGroup> {
    let template = ssc.stackset.spec.route_group.as_ref()?;
    let mut backends: Vec<RouteGroupBackend> = ssc
        .stack_containers
        .values()
        .filter(|sc| sc.effective_traffic_weight > WEIGHT_EPSILON)
        .flat_map(|sc| route_group_backends(sc, sc.effective_traffic_weight))
        .collect();
    backends.sort_by(|a, b| a.name.cmp(&b.name));
    Some(RouteGroup {
        metadata: stackset_meta(ssc, ssc.name()),
        spec: RouteGroupSpec {
            hosts: template.hosts.clone(),
            backends,
            routes: template.routes.clone(),
        },
    })
}

/// Adopts a referenced ConfigMap: ownership and labels are stamped so the
/// object follows its stack through garbage collection. Data is untouched.
/// The converger owns the updated-timestamp marker, so the copy must not
/// carry the old one.
pub fn adopted_config_map(sc: &StackContainer, existing: &ConfigMap) -> ConfigMap {
    let mut adopted = existing.clone();
    adopted.metadata.labels = stack_labels(sc);
    adopted.metadata.owner_references = child_meta(sc, &existing.metadata.name).owner_references;
    adopted
        .metadata
        .annotations
        .remove(CONTROLLER_LAST_UPDATED_ANNOTATION_KEY);
    adopted
}

/// Same adoption for referenced Secrets.
pub fn adopted_secret(sc: &StackContainer, existing: &Secret) -> Secret {
    let mut adopted = existing.clone();
    adopted.metadata.labels = stack_labels(sc);
    adopted.metadata.owner_references = child_meta(sc, &existing.metadata.name).owner_references;
    adopted
        .metadata
        .annotations
        .remove(CONTROLLER_LAST_UPDATED_ANNOTATION_KEY);
    adopted
}

/// Desired credential set for a configuration resource reference.
pub fn credentials_set(ssc: &StackSetContainer, sc: &StackContainer, name: &str) -> PlatformCredentialsSet {
    PlatformCredentialsSet {
        metadata: child_meta(sc, name),
        spec: CredentialsSpec {
            application: ssc.name().to_string(),
            tokens: Default::default(),
        },
    }
}
