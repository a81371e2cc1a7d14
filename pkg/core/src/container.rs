use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use pkg_types::configmap::ConfigMap;
use pkg_types::credentials::PlatformCredentialsSet;
use pkg_types::deployment::Deployment;
use pkg_types::hpa::HorizontalAutoscaler;
use pkg_types::ingress::{self, Ingress};
use pkg_types::routegroup::RouteGroup;
use pkg_types::secret::Secret;
use pkg_types::service::Service;
use pkg_types::stack::{PrescalingStatus, Stack};
use pkg_types::stackset::{DesiredTraffic, StackSet};

use crate::WEIGHT_EPSILON;
use crate::traffic::TrafficReconciler;

/// Child resources observed for one Stack during the current tick.
#[derive(Debug, Clone, Default)]
pub struct StackResources {
    pub deployment: Option<Deployment>,
    pub service: Option<Service>,
    pub autoscaler: Option<HorizontalAutoscaler>,
    pub ingress: Option<Ingress>,
    pub ingress_segment: Option<Ingress>,
    pub route_group: Option<RouteGroup>,
    pub route_group_segment: Option<RouteGroup>,
    pub config_maps: Vec<ConfigMap>,
    pub secrets: Vec<Secret>,
    pub credentials_sets: Vec<PlatformCredentialsSet>,
}

/// One Stack plus everything the tick knows about it. Owned exclusively by
/// the tick and discarded at its end; cross-tick state lives in the Stack's
/// persisted status.
#[derive(Debug, Clone)]
pub struct StackContainer {
    pub stack: Stack,
    /// Derived scheduling hint, never persisted as spec intent.
    pub pending_removal: bool,
    pub resources: StackResources,

    /// Weight configured in the StackSet spec, normalized.
    pub desired_traffic_weight: f64,
    /// Weight observed on the shared routing object at collection time.
    pub actual_traffic_weight: f64,
    /// Weight the reconciler decided to route this tick.
    pub effective_traffic_weight: f64,
    /// Minimum replica floor the prescaler wants applied (0 = none).
    pub prescaling: PrescalingStatus,
    /// Cumulative [lower, upper) weight interval for segment routing.
    pub segment_range: Option<(f64, f64)>,
    pub no_traffic_since: Option<DateTime<Utc>>,
}

impl StackContainer {
    pub fn new(stack: Stack) -> Self {
        let prescaling = stack.status.prescaling.clone();
        let no_traffic_since = stack.status.no_traffic_since;
        Self {
            stack,
            pending_removal: false,
            resources: StackResources::default(),
            desired_traffic_weight: 0.0,
            actual_traffic_weight: 0.0,
            effective_traffic_weight: 0.0,
            prescaling,
            segment_range: None,
            no_traffic_since,
        }
    }

    pub fn name(&self) -> &str {
        &self.stack.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.stack.metadata.namespace
    }

    pub fn uid(&self) -> &str {
        &self.stack.metadata.uid
    }

    pub fn has_traffic(&self) -> bool {
        self.desired_traffic_weight > WEIGHT_EPSILON
            || self.actual_traffic_weight > WEIGHT_EPSILON
    }

    /// Ready replicas as reported by the stack's deployment.
    pub fn ready_replicas(&self) -> u32 {
        self.resources
            .deployment
            .as_ref()
            .map(|d| d.status.ready_replicas)
            .unwrap_or(0)
    }

    pub fn is_ready(&self) -> bool {
        match &self.resources.deployment {
            Some(d) => d.spec.replicas > 0 && d.status.ready_replicas >= d.spec.replicas,
            None => false,
        }
    }
}

/// A weight switch applied this tick, for the TrafficSwitched event.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficChange {
    pub stack_name: String,
    pub old_weight: f64,
    pub new_weight: f64,
}

impl std::fmt::Display for TrafficChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {:.1}% -> {:.1}%",
            self.stack_name, self.old_weight, self.new_weight
        )
    }
}

/// Tick-scoped aggregate of one StackSet, its traffic reconciler, its
/// shared routing objects, and all of its Stacks. Rebuilt from scratch
/// every tick, never retained across cycles.
pub struct StackSetContainer {
    pub stackset: StackSet,
    /// Keyed by Stack UID. BTreeMap so iteration order is deterministic.
    pub stack_containers: BTreeMap<String, StackContainer>,
    /// Chosen once per tick from StackSet annotations; fixed for the tick.
    pub traffic_reconciler: TrafficReconciler,
    pub ingress: Option<Ingress>,
    pub route_group: Option<RouteGroup>,
    pub backend_weights_annotation_key: String,
}

impl StackSetContainer {
    pub fn new(
        stackset: StackSet,
        traffic_reconciler: TrafficReconciler,
        backend_weights_annotation_key: &str,
    ) -> Self {
        Self {
            stackset,
            stack_containers: BTreeMap::new(),
            traffic_reconciler,
            ingress: None,
            route_group: None,
            backend_weights_annotation_key: backend_weights_annotation_key.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.stackset.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.stackset.metadata.namespace
    }

    /// Weights observed on the shared routing object. Route group backends
    /// carry weights in their spec; ingress carries them in an annotation.
    fn observed_weights(&self) -> HashMap<String, f64> {
        if let Some(rg) = &self.route_group {
            return rg
                .spec
                .backends
                .iter()
                .map(|b| (b.name.clone(), b.weight))
                .collect();
        }
        if let Some(ing) = &self.ingress {
            return ingress::backend_weights(
                &ing.metadata.annotations,
                &self.backend_weights_annotation_key,
            );
        }
        HashMap::new()
    }

    /// Folds the collected resources into per-stack traffic bookkeeping.
    /// Called after collection, before any lifecycle or traffic decision.
    pub fn update_from_resources(&mut self) {
        let configured: HashMap<String, f64> = self
            .stackset
            .spec
            .traffic
            .iter()
            .map(|t| (t.stack_name.clone(), t.weight))
            .collect();
        let observed = self.observed_weights();

        for sc in self.stack_containers.values_mut() {
            sc.desired_traffic_weight = configured.get(sc.name()).copied().unwrap_or(0.0);
            sc.actual_traffic_weight = observed.get(sc.name()).copied().unwrap_or(0.0);
        }

        self.normalize(|sc| &mut sc.desired_traffic_weight);
        self.normalize(|sc| &mut sc.actual_traffic_weight);

        // Until a reconciler decides otherwise, routing stays as observed.
        for sc in self.stack_containers.values_mut() {
            sc.effective_traffic_weight = sc.actual_traffic_weight;
        }
    }

    /// Scales the selected weight field so all stacks sum to 100. A total
    /// of zero leaves every weight at zero.
    fn normalize(&mut self, field: impl Fn(&mut StackContainer) -> &mut f64) {
        let mut total = 0.0;
        for sc in self.stack_containers.values_mut() {
            total += *field(sc);
        }
        if total <= WEIGHT_EPSILON {
            return;
        }
        for sc in self.stack_containers.values_mut() {
            let w = field(sc);
            *w = *w / total * 100.0;
        }
    }

    /// Runs the tick's traffic policy. Effective weights and prescaling
    /// floors are written into the stack containers.
    pub fn manage_traffic(&mut self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let reconciler = self.traffic_reconciler.clone();
        reconciler.manage_traffic(self, now)
    }

    /// Weight switches this tick: effective differs from observed.
    pub fn traffic_changes(&self) -> Vec<TrafficChange> {
        self.stack_containers
            .values()
            .filter(|sc| {
                (sc.effective_traffic_weight - sc.actual_traffic_weight).abs() > WEIGHT_EPSILON
            })
            .map(|sc| TrafficChange {
                stack_name: sc.name().to_string(),
                old_weight: sc.actual_traffic_weight,
                new_weight: sc.effective_traffic_weight,
            })
            .collect()
    }

    /// Normalized desired traffic written back to the StackSet spec when it
    /// drifted from what the user configured.
    pub fn generate_stackset_traffic(&self) -> Vec<DesiredTraffic> {
        let mut traffic: Vec<DesiredTraffic> = self
            .stack_containers
            .values()
            .filter(|sc| sc.desired_traffic_weight > WEIGHT_EPSILON)
            .map(|sc| DesiredTraffic {
                stack_name: sc.name().to_string(),
                weight: sc.desired_traffic_weight,
            })
            .collect();
        traffic.sort_by(|a, b| a.stack_name.cmp(&b.stack_name));
        traffic
    }

    /// Stack containers ordered by creation time, oldest first; name breaks
    /// timestamp ties so the order is total.
    pub fn stacks_in_creation_order(&self) -> Vec<&StackContainer> {
        let mut stacks: Vec<&StackContainer> = self.stack_containers.values().collect();
        stacks.sort_by(|a, b| {
            a.stack
                .created_at()
                .cmp(&b.stack.created_at())
                .then_with(|| a.name().cmp(b.name()))
        });
        stacks
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn update_from_resources_normalizes_weights() {
        let ssc = make_container(
            TrafficReconciler::Simple,
            vec![
                (make_stack("app-v1", 120), 40.0, 50.0),
                (make_stack("app-v2", 60), 40.0, 50.0),
            ],
        );
        for sc in ssc.stack_containers.values() {
            assert!((sc.desired_traffic_weight - 50.0).abs() < WEIGHT_EPSILON);
            assert!((sc.actual_traffic_weight - 50.0).abs() < WEIGHT_EPSILON);
        }
    }

    #[test]
    fn zero_total_stays_zero() {
        let ssc = make_container(
            TrafficReconciler::Simple,
            vec![
                (make_stack("app-v1", 120), 0.0, 0.0),
                (make_stack("app-v2", 60), 0.0, 0.0),
            ],
        );
        for sc in ssc.stack_containers.values() {
            assert_eq!(sc.desired_traffic_weight, 0.0);
            assert_eq!(sc.actual_traffic_weight, 0.0);
        }
    }

    #[test]
    fn traffic_changes_reports_only_moved_stacks() {
        let mut ssc = make_container(
            TrafficReconciler::Simple,
            vec![
                (make_stack("app-v1", 120), 20.0, 80.0),
                (make_stack("app-v2", 60), 80.0, 20.0),
            ],
        );
        ssc.manage_traffic(chrono::Utc::now()).unwrap();
        let mut changes = ssc.traffic_changes();
        changes.sort_by(|a, b| a.stack_name.cmp(&b.stack_name));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].stack_name, "app-v1");
        assert!((changes[0].old_weight - 80.0).abs() < WEIGHT_EPSILON);
        assert!((changes[0].new_weight - 20.0).abs() < WEIGHT_EPSILON);
    }

    #[test]
    fn creation_order_is_oldest_first() {
        let ssc = make_container(
            TrafficReconciler::Simple,
            vec![
                (make_stack("app-v2", 60), 50.0, 50.0),
                (make_stack("app-v1", 120), 50.0, 50.0),
            ],
        );
        let ordered: Vec<_> = ssc
            .stacks_in_creation_order()
            .iter()
            .map(|sc| sc.name().to_string())
            .collect();
        assert_eq!(ordered, vec!["app-v1", "app-v2"]);
    }
}
