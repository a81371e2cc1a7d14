use chrono::{DateTime, Duration, Utc};
use tracing::info;

use pkg_types::stack::PrescalingStatus;

use crate::WEIGHT_EPSILON;
use crate::container::StackSetContainer;

/// Per-tick traffic policy. Selected once per StackSet from its annotations
/// when the tick's aggregate is built; the choice cannot change mid-tick.
#[derive(Debug, Clone)]
pub enum TrafficReconciler {
    /// Effective weight equals configured weight, always. Stateless.
    Simple,
    /// Raises a stack's minimum replica floor ahead of a traffic increase
    /// and holds it for a delay after the increase completes.
    Prescaling(PrescalingReconciler),
}

impl TrafficReconciler {
    pub fn manage_traffic(
        &self,
        ssc: &mut StackSetContainer,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        match self {
            TrafficReconciler::Simple => {
                for sc in ssc.stack_containers.values_mut() {
                    sc.effective_traffic_weight = sc.desired_traffic_weight;
                }
                Ok(())
            }
            TrafficReconciler::Prescaling(p) => p.manage_traffic(ssc, now),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrescalingReconciler {
    /// How long the raised floor is held after the increase completes.
    pub reset_delay: Duration,
}

/// Replica count implied by serving `weight` percent of the traffic that
/// `basis` replicas currently serve. Never below one.
fn implied_replicas(basis: u32, weight: f64) -> u32 {
    ((basis as f64 * weight / 100.0).ceil() as u32).max(1)
}

impl PrescalingReconciler {
    /// Per-stack state machine:
    ///
    ///   Idle -> ScalingUp      weight increase detected; floor raised
    ///   ScalingUp -> CoolingDown  implicit: floor satisfied, weight routed
    ///   CoolingDown -> Idle    reset deadline elapsed, or the weight
    ///                          dropped back to (or below) its baseline
    ///
    /// Routing is all-or-nothing: weights sum to 100, so no stack switches
    /// until every prescaled stack has its floor satisfied.
    pub fn manage_traffic(
        &self,
        ssc: &mut StackSetContainer,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        // Replicas currently serving traffic; the basis for new floors.
        let basis: u32 = ssc
            .stack_containers
            .values()
            .filter(|sc| sc.actual_traffic_weight > WEIGHT_EPSILON)
            .map(|sc| {
                sc.resources
                    .deployment
                    .as_ref()
                    .map(|d| d.spec.replicas)
                    .unwrap_or(sc.stack.spec.replicas)
            })
            .sum();

        let mut all_floors_satisfied = true;
        let stackset_name = ssc.stackset.metadata.name.clone();

        for sc in ssc.stack_containers.values_mut() {
            let increasing =
                sc.desired_traffic_weight > sc.actual_traffic_weight + WEIGHT_EPSILON;

            if increasing {
                if !sc.prescaling.active {
                    let implied_basis = if basis > 0 { basis } else { sc.stack.spec.replicas };
                    let mut floor = implied_replicas(implied_basis, sc.desired_traffic_weight);
                    if let Some(autoscaler) = &sc.stack.spec.autoscaler {
                        floor = floor.clamp(autoscaler.min_replicas, autoscaler.max_replicas);
                    }
                    sc.prescaling.active = true;
                    sc.prescaling.replicas = floor;
                    sc.prescaling.baseline_weight = sc.actual_traffic_weight;
                    info!(
                        stackset = %stackset_name,
                        stack = %sc.stack.metadata.name,
                        floor,
                        "prescaling stack ahead of traffic increase"
                    );
                }
                // Every further increase pushes the deadline out again.
                sc.prescaling.reset_deadline = Some(now + self.reset_delay);
            } else if sc.prescaling.active {
                let fell_below_baseline = sc.desired_traffic_weight
                    <= sc.prescaling.baseline_weight + WEIGHT_EPSILON;
                let deadline_elapsed = match sc.prescaling.reset_deadline {
                    Some(deadline) => now >= deadline,
                    None => true,
                };
                if fell_below_baseline || deadline_elapsed {
                    sc.prescaling = PrescalingStatus::default();
                }
            }

            if sc.prescaling.active
                && increasing
                && sc.ready_replicas() < sc.prescaling.replicas
            {
                all_floors_satisfied = false;
            }
        }

        // Switch routing only when every prescaled stack is ready;
        // otherwise hold all weights at their observed values.
        for sc in ssc.stack_containers.values_mut() {
            sc.effective_traffic_weight = if all_floors_satisfied {
                sc.desired_traffic_weight
            } else {
                sc.actual_traffic_weight
            };
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testutil::*;

    fn prescaling(minutes: i64) -> TrafficReconciler {
        TrafficReconciler::Prescaling(PrescalingReconciler {
            reset_delay: Duration::minutes(minutes),
        })
    }

    #[test]
    fn simple_effective_equals_configured() {
        let mut ssc = make_container(
            TrafficReconciler::Simple,
            vec![
                (make_stack("app-v1", 120), 80.0, 20.0),
                (make_stack("app-v2", 60), 20.0, 80.0),
            ],
        );
        ssc.manage_traffic(Utc::now()).unwrap();
        for sc in ssc.stack_containers.values() {
            assert_eq!(sc.effective_traffic_weight, sc.desired_traffic_weight);
        }
    }

    #[test]
    fn prescaling_raises_floor_and_holds_routing_until_ready() {
        let mut gaining = make_stack("app-v2", 60);
        gaining.spec.replicas = 1;
        let mut ssc = make_container(
            prescaling(10),
            vec![
                (make_stack("app-v1", 120), 20.0, 80.0),
                (gaining, 80.0, 20.0),
            ],
        );
        // The gaining stack only has one ready replica; its floor will be
        // computed from the 3+1 replicas currently serving traffic.
        let now = Utc::now();
        ssc.manage_traffic(now).unwrap();

        let sc = ssc.stack_containers.values().find(|s| s.name() == "app-v2").unwrap();
        assert!(sc.prescaling.active);
        assert_eq!(sc.prescaling.replicas, 4); // ceil(4 * 80 / 100)
        assert_eq!(sc.prescaling.reset_deadline, Some(now + Duration::minutes(10)));

        // Floor not satisfied: routing stays where it was, for all stacks.
        for sc in ssc.stack_containers.values() {
            assert!((sc.effective_traffic_weight - sc.actual_traffic_weight).abs() < WEIGHT_EPSILON);
        }
    }

    #[test]
    fn prescaling_switches_once_floor_is_satisfied() {
        let mut ssc = make_container(
            prescaling(10),
            vec![
                (make_stack("app-v1", 120), 20.0, 80.0),
                (make_stack("app-v2", 60), 80.0, 20.0),
            ],
        );
        // Both deployments run 3 replicas, so the floor for 80% of traffic
        // is ceil(6 * 0.8) = 5. Report enough ready replicas to satisfy it.
        let sc = ssc.stack_containers.values_mut().find(|s| s.name() == "app-v2").unwrap();
        let deployment = sc.resources.deployment.as_mut().unwrap();
        deployment.status.ready_replicas = 5;

        ssc.manage_traffic(Utc::now()).unwrap();
        let v2 = ssc.stack_containers.values().find(|s| s.name() == "app-v2").unwrap();
        assert!((v2.effective_traffic_weight - 80.0).abs() < WEIGHT_EPSILON);
        let v1 = ssc.stack_containers.values().find(|s| s.name() == "app-v1").unwrap();
        assert!((v1.effective_traffic_weight - 20.0).abs() < WEIGHT_EPSILON);
    }

    #[test]
    fn floor_survives_restart_until_deadline() {
        // Weight already switched (desired == actual), deadline in the
        // future, prescaling status reloaded from the persisted stack.
        let mut stack = make_stack("app-v2", 60);
        stack.status.prescaling = PrescalingStatus {
            active: true,
            replicas: 4,
            baseline_weight: 20.0,
            reset_deadline: Some(Utc::now() + Duration::minutes(5)),
        };
        let mut ssc = make_container(
            prescaling(10),
            vec![(make_stack("app-v1", 120), 20.0, 20.0), (stack, 80.0, 80.0)],
        );
        ssc.manage_traffic(Utc::now()).unwrap();

        let sc = ssc.stack_containers.values().find(|s| s.name() == "app-v2").unwrap();
        assert!(sc.prescaling.active);
        assert_eq!(sc.prescaling.replicas, 4);
    }

    #[test]
    fn floor_removed_after_deadline() {
        let mut stack = make_stack("app-v2", 60);
        stack.status.prescaling = PrescalingStatus {
            active: true,
            replicas: 4,
            baseline_weight: 20.0,
            reset_deadline: Some(Utc::now() - Duration::seconds(1)),
        };
        let mut ssc = make_container(
            prescaling(10),
            vec![(make_stack("app-v1", 120), 20.0, 20.0), (stack, 80.0, 80.0)],
        );
        ssc.manage_traffic(Utc::now()).unwrap();

        let sc = ssc.stack_containers.values().find(|s| s.name() == "app-v2").unwrap();
        assert!(!sc.prescaling.active);
        assert_eq!(sc.prescaling.replicas, 0);
    }

    #[test]
    fn decrease_below_baseline_returns_to_idle_immediately() {
        let mut stack = make_stack("app-v2", 60);
        stack.status.prescaling = PrescalingStatus {
            active: true,
            replicas: 4,
            baseline_weight: 20.0,
            reset_deadline: Some(Utc::now() + Duration::minutes(9)),
        };
        // Configured weight rolled back to the baseline while cooling down.
        let mut ssc = make_container(
            prescaling(10),
            vec![(make_stack("app-v1", 120), 80.0, 20.0), (stack, 20.0, 80.0)],
        );
        ssc.manage_traffic(Utc::now()).unwrap();

        let sc = ssc.stack_containers.values().find(|s| s.name() == "app-v2").unwrap();
        assert!(!sc.prescaling.active, "stale deadline must not hold the floor");
    }

    #[test]
    fn decrease_above_baseline_keeps_the_floor() {
        let mut stack = make_stack("app-v2", 60);
        stack.status.prescaling = PrescalingStatus {
            active: true,
            replicas: 4,
            baseline_weight: 20.0,
            reset_deadline: Some(Utc::now() + Duration::minutes(9)),
        };
        // Rolled back part-way: 50 is still above the 20 baseline.
        let mut ssc = make_container(
            prescaling(10),
            vec![(make_stack("app-v1", 120), 50.0, 20.0), (stack, 50.0, 80.0)],
        );
        ssc.manage_traffic(Utc::now()).unwrap();

        let sc = ssc.stack_containers.values().find(|s| s.name() == "app-v2").unwrap();
        assert!(sc.prescaling.active);
        assert_eq!(sc.prescaling.replicas, 4);
    }
}
