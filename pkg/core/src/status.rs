use chrono::{DateTime, Utc};

use pkg_types::stack::StackStatus;
use pkg_types::stackset::{ActualTraffic, StackSetStatus};

use crate::WEIGHT_EPSILON;
use crate::container::{StackContainer, StackSetContainer};

/// Status computed from the final tick-scoped model for one Stack. Written
/// only when it differs from the value last read from the store.
pub fn generate_stack_status(sc: &StackContainer, now: DateTime<Utc>) -> StackStatus {
    let deployment = sc.resources.deployment.as_ref();
    let serving = sc.effective_traffic_weight > WEIGHT_EPSILON
        || sc.desired_traffic_weight > WEIGHT_EPSILON;
    StackStatus {
        desired_traffic_weight: sc.desired_traffic_weight,
        actual_traffic_weight: sc.effective_traffic_weight,
        replicas: deployment.map(|d| d.status.replicas).unwrap_or(0),
        ready_replicas: deployment.map(|d| d.status.ready_replicas).unwrap_or(0),
        updated_replicas: deployment.map(|d| d.status.updated_replicas).unwrap_or(0),
        no_traffic_since: if serving {
            None
        } else {
            // Keep the first-observed instant so retention ages correctly.
            sc.no_traffic_since.or(Some(now))
        },
        prescaling: sc.prescaling.clone(),
    }
}

/// Aggregated per-stack summary for the StackSet status.
pub fn generate_stackset_status(ssc: &StackSetContainer) -> StackSetStatus {
    let mut traffic: Vec<ActualTraffic> = ssc
        .stack_containers
        .values()
        .filter(|sc| sc.effective_traffic_weight > WEIGHT_EPSILON)
        .map(|sc| ActualTraffic {
            stack_name: sc.name().to_string(),
            weight: sc.effective_traffic_weight,
        })
        .collect();
    traffic.sort_by(|a, b| a.stack_name.cmp(&b.stack_name));

    StackSetStatus {
        observed_stack_version: ssc.stackset.status.observed_stack_version.clone(),
        stacks: ssc.stack_containers.len() as u32,
        ready_stacks: ssc.stack_containers.values().filter(|sc| sc.is_ready()).count() as u32,
        stacks_with_traffic: traffic.len() as u32,
        traffic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testutil::*;
    use crate::traffic::TrafficReconciler;

    #[test]
    fn stack_status_reflects_deployment_and_weights() {
        let mut ssc = make_container(
            TrafficReconciler::Simple,
            vec![
                (make_stack("app-v1", 200), 20.0, 80.0),
                (make_stack("app-v2", 100), 80.0, 20.0),
            ],
        );
        let now = Utc::now();
        ssc.manage_traffic(now).unwrap();

        let sc = ssc
            .stack_containers
            .values()
            .find(|s| s.name() == "app-v2")
            .unwrap();
        let status = generate_stack_status(sc, now);
        assert_eq!(status.replicas, 3);
        assert_eq!(status.ready_replicas, 3);
        assert!((status.desired_traffic_weight - 80.0).abs() < WEIGHT_EPSILON);
        assert!((status.actual_traffic_weight - 80.0).abs() < WEIGHT_EPSILON);
        assert_eq!(status.no_traffic_since, None);
    }

    #[test]
    fn zero_traffic_stamps_no_traffic_since_once() {
        let mut ssc = make_container(
            TrafficReconciler::Simple,
            vec![
                (make_stack("app-v1", 200), 0.0, 0.0),
                (make_stack("app-v2", 100), 100.0, 100.0),
            ],
        );
        let now = Utc::now();
        ssc.manage_traffic(now).unwrap();

        let sc = ssc
            .stack_containers
            .values()
            .find(|s| s.name() == "app-v1")
            .unwrap();
        let status = generate_stack_status(sc, now);
        assert_eq!(status.no_traffic_since, Some(now));

        // A pre-existing stamp is preserved, not refreshed.
        let mut aged = sc.clone();
        let earlier = now - chrono::Duration::hours(2);
        aged.no_traffic_since = Some(earlier);
        let status = generate_stack_status(&aged, now);
        assert_eq!(status.no_traffic_since, Some(earlier));
    }

    #[test]
    fn stackset_status_counts_and_traffic() {
        let mut ssc = make_container(
            TrafficReconciler::Simple,
            vec![
                (make_stack("app-v1", 200), 0.0, 0.0),
                (make_stack("app-v2", 100), 100.0, 100.0),
            ],
        );
        ssc.stackset.status.observed_stack_version = "v2".to_string();
        ssc.manage_traffic(Utc::now()).unwrap();

        let status = generate_stackset_status(&ssc);
        assert_eq!(status.stacks, 2);
        assert_eq!(status.ready_stacks, 2);
        assert_eq!(status.stacks_with_traffic, 1);
        assert_eq!(status.observed_stack_version, "v2");
        assert_eq!(status.traffic.len(), 1);
        assert_eq!(status.traffic[0].stack_name, "app-v2");
    }
}
