use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::bail;
use chrono::Utc;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use pkg_constants::annotations::{
    CONTROLLER_ANNOTATION_KEY, DEFAULT_BACKEND_WEIGHTS_ANNOTATION_KEY,
};
use pkg_constants::defaults::{
    DEFAULT_INTERVAL_SECS, DEFAULT_RECONCILE_WORKERS, LIVENESS_INTERVAL_MULTIPLIER,
};
use pkg_core::container::{StackContainer, StackSetContainer};
use pkg_core::{generate, lifecycle, segments, status};
use pkg_metrics::{MetricsRegistry, names};
use pkg_state::client::{ApiClient, ApiError};
use pkg_state::watch::{EventType, StackSetEvent, WatchFeed};
use pkg_types::stack::ConfigurationResourceKind;
use pkg_types::stackset::StackSet;
use pkg_types::validate::validate_all_configuration_resource_names;

use crate::collect;
use crate::converge::{Outcome, converge};
use crate::recorder::{Recorder, error_event};

/// Status writes retry on conflict at most this many times per object; the
/// next tick is the ultimate retry bound.
const MAX_STATUS_RETRIES: usize = 5;

const REASON_FAILED_MANAGE_STACKSET: &str = "FailedManageStackSet";

/// Controller configuration resolved from CLI flags and the config file.
#[derive(Debug, Clone)]
pub struct StackSetConfig {
    /// Operating namespace; every store call is scoped to it.
    pub namespace: String,
    /// Identity used for StackSet ownership. Empty means this instance
    /// owns unmarked StackSets.
    pub controller_id: String,
    pub interval: Duration,
    pub reconcile_workers: usize,
    pub backend_weights_annotation_key: String,
    pub route_group_support_enabled: bool,
    pub config_map_support_enabled: bool,
    pub secret_support_enabled: bool,
    pub credentials_support_enabled: bool,
}

impl Default for StackSetConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            controller_id: String::new(),
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            reconcile_workers: DEFAULT_RECONCILE_WORKERS,
            backend_weights_annotation_key: DEFAULT_BACKEND_WEIGHTS_ANNOTATION_KEY.to_string(),
            route_group_support_enabled: false,
            config_map_support_enabled: false,
            secret_support_enabled: false,
            credentials_support_enabled: false,
        }
    }
}

/// Liveness signal for the probe endpoint. Fails when the last tick start
/// is older than five tick intervals, catching starvation and deadlocks.
pub struct Health {
    last_tick_ms: AtomicI64,
    max_lag: Duration,
}

impl Health {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_tick_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            max_lag: interval * LIVENESS_INTERVAL_MULTIPLIER,
        }
    }

    pub fn record_tick(&self) {
        self.last_tick_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn alive(&self) -> bool {
        let last = self.last_tick_ms.load(Ordering::Relaxed);
        let lag = Utc::now().timestamp_millis().saturating_sub(last);
        lag <= self.max_lag.as_millis() as i64
    }
}

fn stackset_ref(ssc: &StackSetContainer) -> String {
    format!("StackSet {}/{}", ssc.namespace(), ssc.name())
}

fn stack_ref(sc: &StackContainer) -> String {
    format!("Stack {}/{}", sc.namespace(), sc.name())
}

/// Per-stackset reconciliation logic, cloneable into worker tasks.
#[derive(Clone)]
pub struct Reconciler {
    pub(crate) client: Arc<dyn ApiClient>,
    pub(crate) recorder: Arc<Recorder>,
    pub(crate) config: Arc<StackSetConfig>,
}

impl Reconciler {
    pub fn new(client: Arc<dyn ApiClient>, recorder: Arc<Recorder>, config: Arc<StackSetConfig>) -> Self {
        Self {
            client,
            recorder,
            config,
        }
    }

    /// Runs every reconciliation stage for one StackSet, in the fixed
    /// order collection output demands: stack creation, traffic, lifecycle
    /// marking, segment planning, resource convergence, cleanup, status.
    /// Best-effort stages event their failures and let the later stages
    /// run; only a failed status write propagates.
    pub async fn reconcile_stack_set(&self, mut container: StackSetContainer) -> anyhow::Result<()> {
        let ssc_ref = stackset_ref(&container);

        if let Err(err) = self.create_current_stack(&mut container).await {
            let err = error_event(&self.recorder, &ssc_ref, "FailedCreateStack", err);
            warn!(stackset = %container.name(), "unable to create stack: {:#}", err);
        }

        container.update_from_resources();

        let now = Utc::now();
        if let Err(err) = container.manage_traffic(now) {
            self.recorder.warning(
                &ssc_ref,
                "TrafficNotSwitched",
                &format!("Failed to switch traffic: {}", err),
            );
        }

        lifecycle::mark_expired_stacks(&mut container);

        let ordered = match segments::compute_traffic_segments(&mut container) {
            Ok(ordered) => ordered,
            Err(err) => {
                let err = error_event(&self.recorder, &ssc_ref, "FailedManageSegments", err);
                warn!(stackset = %container.name(), "unable to reconcile traffic segments: {:#}", err);
                Vec::new()
            }
        };

        // Segment-ordered stacks first, then the rest.
        let remaining: Vec<String> = container
            .stack_containers
            .keys()
            .filter(|uid| !ordered.contains(*uid))
            .cloned()
            .collect();
        for uid in ordered.iter().chain(remaining.iter()) {
            self.reconcile_stack_resources(&container, uid).await;
        }

        self.reconcile_stackset_routing(&container).await;
        self.record_traffic_switch(&container);

        if let Err(err) = self.reconcile_desired_traffic(&container).await {
            let err = error_event(&self.recorder, &ssc_ref, REASON_FAILED_MANAGE_STACKSET, err);
            warn!(stackset = %container.name(), "unable to reconcile stackset traffic: {:#}", err);
        }

        self.cleanup_old_stacks(&container).await;

        self.reconcile_statuses(&container).await
    }

    /// Creates the Stack for the current template revision, if needed, and
    /// persists the observed version in the StackSet status right away so a
    /// repeat tick stays idempotent.
    async fn create_current_stack(&self, container: &mut StackSetContainer) -> anyhow::Result<()> {
        let Some((stack, version)) = lifecycle::new_stack(container) else {
            return Ok(());
        };

        if self.config.config_map_support_enabled || self.config.secret_support_enabled {
            validate_all_configuration_resource_names(&stack)?;
        }

        match self
            .client
            .get_stack(&stack.metadata.namespace, &stack.metadata.name)
            .await
        {
            Ok(existing) => {
                if existing.metadata.owner_uid() != Some(container.stackset.metadata.uid.as_str())
                {
                    bail!(
                        "stack {} already exists and is not owned by StackSet {}",
                        stack.metadata.name,
                        container.name()
                    );
                }
                // Owned but created outside this tick's listing; the next
                // collection will pick it up.
                return Ok(());
            }
            Err(ApiError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        let created = self.client.create_stack(&stack).await?;
        self.recorder.normal(
            &stackset_ref(container),
            "CreatedStack",
            &format!("Created stack {}", created.metadata.name),
        );

        let mut updated = container.stackset.clone();
        updated.status.observed_stack_version = version;
        let result = self.client.update_stack_set_status(&updated).await?;
        container.stackset = result;

        container
            .stack_containers
            .insert(created.metadata.uid.clone(), StackContainer::new(created));
        Ok(())
    }

    /// Converges every child resource kind of one stack. Per-resource
    /// failures are evented and do not block sibling kinds.
    async fn reconcile_stack_resources(&self, container: &StackSetContainer, uid: &str) {
        let Some(sc) = container.stack_containers.get(uid) else {
            return;
        };
        let sref = stack_ref(sc);
        let now = Utc::now();
        let client = self.client.as_ref();

        if let Err(err) = converge(
            client,
            sc.resources.ingress.as_ref(),
            generate::ingress(container, sc),
            now,
        )
        .await
        {
            self.recorder
                .warning(&sref, "FailedManageIngress", &err.to_string());
        }

        if let Err(err) = converge(
            client,
            sc.resources.ingress_segment.as_ref(),
            generate::ingress_segment(container, sc),
            now,
        )
        .await
        {
            self.recorder
                .warning(&sref, "FailedManageIngressSegment", &err.to_string());
        }

        if self.config.route_group_support_enabled {
            if let Err(err) = converge(
                client,
                sc.resources.route_group.as_ref(),
                generate::route_group(container, sc),
                now,
            )
            .await
            {
                self.recorder
                    .warning(&sref, "FailedManageRouteGroup", &err.to_string());
            }

            if let Err(err) = converge(
                client,
                sc.resources.route_group_segment.as_ref(),
                generate::route_group_segment(container, sc),
                now,
            )
            .await
            {
                self.recorder
                    .warning(&sref, "FailedManageRouteGroupSegment", &err.to_string());
            }
        }

        if self.config.config_map_support_enabled {
            for rsc in &sc.stack.spec.configuration_resources {
                if rsc.kind != ConfigurationResourceKind::ConfigMap {
                    continue;
                }
                let existing = sc
                    .resources
                    .config_maps
                    .iter()
                    .find(|cm| cm.metadata.name == rsc.name);
                let Some(existing) = existing else {
                    continue;
                };
                let desired = generate::adopted_config_map(sc, existing);
                if let Err(err) = converge(client, Some(existing), Some(desired), now).await {
                    self.recorder
                        .warning(&sref, "FailedManageConfigMapRefs", &err.to_string());
                }
            }
        }

        if self.config.secret_support_enabled {
            for rsc in &sc.stack.spec.configuration_resources {
                if rsc.kind != ConfigurationResourceKind::Secret {
                    continue;
                }
                let existing = sc
                    .resources
                    .secrets
                    .iter()
                    .find(|s| s.metadata.name == rsc.name);
                let Some(existing) = existing else {
                    continue;
                };
                let desired = generate::adopted_secret(sc, existing);
                if let Err(err) = converge(client, Some(existing), Some(desired), now).await {
                    self.recorder
                        .warning(&sref, "FailedManageSecretRefs", &err.to_string());
                }
            }
        }

        if self.config.credentials_support_enabled {
            for rsc in &sc.stack.spec.configuration_resources {
                if rsc.kind != ConfigurationResourceKind::PlatformCredentialsSet {
                    continue;
                }
                let existing = sc
                    .resources
                    .credentials_sets
                    .iter()
                    .find(|cs| cs.metadata.name == rsc.name);
                let desired = generate::credentials_set(container, sc, &rsc.name);
                if let Err(err) = converge(client, existing, Some(desired), now).await {
                    self.recorder.warning(
                        &sref,
                        "FailedManagePlatformCredentialsSet",
                        &err.to_string(),
                    );
                }
            }
        }

        if let Err(err) = converge(
            client,
            sc.resources.deployment.as_ref(),
            Some(generate::deployment(sc)),
            now,
        )
        .await
        {
            self.recorder
                .warning(&sref, "FailedManageDeployment", &err.to_string());
        }

        if let Err(err) = converge(
            client,
            sc.resources.autoscaler.as_ref(),
            generate::autoscaler(sc),
            now,
        )
        .await
        {
            self.recorder
                .warning(&sref, "FailedManageAutoscaler", &err.to_string());
        }

        if let Err(err) = converge(
            client,
            sc.resources.service.as_ref(),
            Some(generate::service(sc)),
            now,
        )
        .await
        {
            self.recorder
                .warning(&sref, "FailedManageService", &err.to_string());
        }
    }

    /// Converges the stackset-level shared routing objects. Never deletes;
    /// a removed template leaves the existing object alone.
    async fn reconcile_stackset_routing(&self, container: &StackSetContainer) {
        let ssc_ref = stackset_ref(container);
        let now = Utc::now();
        let client = self.client.as_ref();

        match converge(
            client,
            container.ingress.as_ref(),
            generate::stackset_ingress(container),
            now,
        )
        .await
        {
            Ok(Outcome::Created) => self.recorder.normal(
                &ssc_ref,
                "CreatedIngress",
                &format!("Created Ingress {}", container.name()),
            ),
            Ok(Outcome::Updated) => self.recorder.normal(
                &ssc_ref,
                "UpdatedIngress",
                &format!("Updated Ingress {}", container.name()),
            ),
            Ok(Outcome::Unchanged) => {}
            Err(err) => {
                self.recorder
                    .warning(&ssc_ref, "FailedManageIngress", &err.to_string());
            }
        }

        if self.config.route_group_support_enabled {
            match converge(
                client,
                container.route_group.as_ref(),
                generate::stackset_route_group(container),
                now,
            )
            .await
            {
                Ok(Outcome::Created) => self.recorder.normal(
                    &ssc_ref,
                    "CreatedRouteGroup",
                    &format!("Created RouteGroup {}", container.name()),
                ),
                Ok(Outcome::Updated) => self.recorder.normal(
                    &ssc_ref,
                    "UpdatedRouteGroup",
                    &format!("Updated RouteGroup {}", container.name()),
                ),
                Ok(Outcome::Unchanged) => {}
                Err(err) => {
                    self.recorder
                        .warning(&ssc_ref, "FailedManageRouteGroup", &err.to_string());
                }
            }
        }
    }

    /// Events the weight switches applied this tick, when there are any.
    fn record_traffic_switch(&self, container: &StackSetContainer) {
        let changes = container.traffic_changes();
        if changes.is_empty() {
            return;
        }
        let messages: Vec<String> = changes.iter().map(|c| c.to_string()).collect();
        self.recorder.normal(
            &stackset_ref(container),
            "TrafficSwitched",
            &format!("Switched traffic: {}", messages.join(", ")),
        );
    }

    /// Writes the normalized desired traffic back to the StackSet spec
    /// when it drifted from what is stored.
    async fn reconcile_desired_traffic(&self, container: &StackSetContainer) -> anyhow::Result<()> {
        let desired = container.generate_stackset_traffic();
        if container.stackset.spec.traffic == desired {
            return Ok(());
        }

        let mut updated = container.stackset.clone();
        updated.spec.traffic = desired;
        self.client.update_stack_set(&updated).await?;
        self.recorder.normal(
            &stackset_ref(container),
            "UpdatedStackSet",
            &format!("Updated StackSet {}", container.name()),
        );
        Ok(())
    }

    /// Deletes every stack flagged PendingRemoval. A failed delete is
    /// evented and does not block deletion attempts on the other stacks.
    async fn cleanup_old_stacks(&self, container: &StackSetContainer) {
        let ssc_ref = stackset_ref(container);
        for sc in container.stack_containers.values() {
            if !sc.pending_removal {
                continue;
            }
            match self.client.delete_stack(sc.namespace(), sc.name()).await {
                Ok(()) => self.recorder.normal(
                    &ssc_ref,
                    "DeletedExcessStack",
                    &format!("Deleted excess stack {}", sc.name()),
                ),
                Err(err) => {
                    self.recorder
                        .warning(&ssc_ref, "FailedDeleteStack", &err.to_string());
                }
            }
        }
    }

    /// Writes computed statuses with optimistic-concurrency retry: on
    /// conflict, refetch, re-diff against the fresh object, and try again
    /// until the write lands, nothing is left to write, or a non-conflict
    /// error ends the loop.
    async fn reconcile_statuses(&self, container: &StackSetContainer) -> anyhow::Result<()> {
        let now = Utc::now();

        for sc in container.stack_containers.values() {
            if sc.pending_removal {
                continue;
            }
            let desired_status = status::generate_stack_status(sc, now);
            let sref = stack_ref(sc);
            let mut stack = sc.stack.clone();
            let mut attempts = 0;
            loop {
                if stack.status == desired_status {
                    break;
                }
                let mut updated = stack.clone();
                updated.status = desired_status.clone();
                match self.client.update_stack_status(&updated).await {
                    Ok(_) => break,
                    Err(err) if err.is_conflict() && attempts < MAX_STATUS_RETRIES => {
                        attempts += 1;
                        stack = self
                            .client
                            .get_stack(&updated.metadata.namespace, &updated.metadata.name)
                            .await
                            .map_err(|e| {
                                error_event(
                                    &self.recorder,
                                    &sref,
                                    "FailedUpdateStackStatus",
                                    e.into(),
                                )
                            })?;
                    }
                    Err(err) => {
                        return Err(error_event(
                            &self.recorder,
                            &sref,
                            "FailedUpdateStackStatus",
                            err.into(),
                        ));
                    }
                }
            }
        }

        let mut desired_status = status::generate_stackset_status(container);
        let ssc_ref = stackset_ref(container);
        let mut stackset = container.stackset.clone();
        let mut attempts = 0;
        loop {
            // The observed version belongs to the creation path; carry the
            // stored value rather than overwriting it with a stale one.
            desired_status.observed_stack_version = stackset.status.observed_stack_version.clone();
            if stackset.status == desired_status {
                break;
            }
            let mut updated = stackset.clone();
            updated.status = desired_status.clone();
            match self.client.update_stack_set_status(&updated).await {
                Ok(_) => break,
                Err(err) if err.is_conflict() && attempts < MAX_STATUS_RETRIES => {
                    attempts += 1;
                    stackset = self
                        .client
                        .get_stack_set(&updated.metadata.namespace, &updated.metadata.name)
                        .await
                        .map_err(|e| {
                            error_event(
                                &self.recorder,
                                &ssc_ref,
                                "FailedUpdateStackSetStatus",
                                e.into(),
                            )
                        })?;
                }
                Err(err) => {
                    return Err(error_event(
                        &self.recorder,
                        &ssc_ref,
                        "FailedUpdateStackSetStatus",
                        err.into(),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// The main controller: consumes the StackSet watch feed, runs a periodic
/// tick, and fans reconciliation out across a bounded worker pool with
/// per-task fault isolation.
pub struct StackSetController {
    reconciler: Reconciler,
    config: Arc<StackSetConfig>,
    metrics: Arc<MetricsRegistry>,
    health: Arc<Health>,
    feed: WatchFeed,
    /// Watched-object store, mutated only by the event-consuming loop.
    /// Workers get tick-scoped copies built before dispatch.
    store: HashMap<String, StackSet>,
}

impl StackSetController {
    pub fn new(
        client: Arc<dyn ApiClient>,
        feed: WatchFeed,
        config: StackSetConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        names::register_controller_metrics(&metrics);
        let health = Arc::new(Health::new(config.interval));
        let config = Arc::new(config);
        Self {
            reconciler: Reconciler::new(client, Arc::new(Recorder::new()), config.clone()),
            config,
            metrics,
            health,
            feed,
            store: HashMap::new(),
        }
    }

    pub fn health(&self) -> Arc<Health> {
        self.health.clone()
    }

    pub fn recorder(&self) -> Arc<Recorder> {
        self.reconciler.recorder.clone()
    }

    /// Whether this controller instance owns the StackSet, decided purely
    /// by the controller annotation. A missing annotation belongs to the
    /// instance running with an empty controller id.
    fn has_ownership(&self, stackset: &StackSet) -> bool {
        match stackset.metadata.annotations.get(CONTROLLER_ANNOTATION_KEY) {
            Some(owner) => *owner == self.config.controller_id,
            None => self.config.controller_id.is_empty(),
        }
    }

    /// Admits one watch notification into the watched store. StackSets not
    /// owned by this instance are silently ignored.
    pub fn apply_event(&mut self, event: StackSetEvent) {
        let stackset = event.stackset;
        let uid = stackset.metadata.uid.clone();
        match event.event_type {
            EventType::Deleted => {
                self.store.remove(&uid);
            }
            EventType::Added | EventType::Updated => {
                if !self.has_ownership(&stackset) {
                    self.store.remove(&uid);
                    return;
                }
                if !self.store.contains_key(&uid) {
                    info!(
                        "Adding entry for StackSet {}/{}",
                        stackset.metadata.namespace, stackset.metadata.name
                    );
                }
                self.store.insert(uid, stackset);
            }
        }
    }

    /// One full reconciliation cycle: collect, then fan out one worker per
    /// StackSet, bounded by the configured pool size. A panicking worker is
    /// caught at the join boundary, counted, and never takes down siblings
    /// or the driver.
    pub async fn tick(&mut self) {
        self.metrics.counter_inc(names::TICKS_TOTAL);

        let containers = match collect::collect_resources(
            self.reconciler.client.as_ref(),
            &self.config,
            &self.store,
        )
        .await
        {
            Ok(containers) => containers,
            Err(err) => {
                self.metrics.counter_inc(names::COLLECTION_FAILURES_TOTAL);
                error!("Failed to collect resources: {:#}", err);
                return;
            }
        };

        let stacks: usize = containers.values().map(|c| c.stack_containers.len()).sum();
        self.metrics.gauge_set(names::STACKSETS, containers.len() as i64);
        self.metrics.gauge_set(names::STACKS, stacks as i64);

        let semaphore = Arc::new(Semaphore::new(self.config.reconcile_workers));
        let mut tasks = JoinSet::new();
        for (_, container) in containers {
            let reconciler = self.reconciler.clone();
            let semaphore = semaphore.clone();
            let name = format!("{}/{}", container.namespace(), container.name());
            let ssc_ref = stackset_ref(&container);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("worker semaphore closed");
                let result = reconciler.reconcile_stack_set(container).await;
                (name, ssc_ref, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, _, Ok(()))) => {}
                Ok((name, ssc_ref, Err(err))) => {
                    self.metrics.counter_inc(names::RECONCILE_ERRORS_TOTAL);
                    let err = error_event(
                        &self.reconciler.recorder,
                        &ssc_ref,
                        REASON_FAILED_MANAGE_STACKSET,
                        err,
                    );
                    error!(stackset = %name, "unable to reconcile a stackset: {:#}", err);
                }
                Err(join_err) if join_err.is_panic() => {
                    self.metrics.counter_inc(names::PANICS_TOTAL);
                    error!("Encountered a panic while processing a stackset: {}", join_err);
                }
                Err(join_err) => {
                    error!("Reconciliation worker failed: {}", join_err);
                }
            }
        }
    }

    /// The main loop: interleaves watch events with the periodic tick and
    /// stops scheduling once the shutdown signal flips. In-flight work runs
    /// to completion or to its own error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut events = self.feed.subscribe();
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "StackSetController started (namespace={}, interval={}s, workers={})",
            self.config.namespace,
            self.config.interval.as_secs(),
            self.config.reconcile_workers
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.health.record_tick();
                    self.tick().await;
                }
                event = events.recv() => match event {
                    Ok(event) => self.apply_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("StackSet watch feed lagged by {} events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        bail!("StackSet watch feed closed");
                    }
                },
                _ = shutdown.changed() => {
                    info!("Terminating main controller loop.");
                    return Ok(());
                }
            }
        }
    }
}
