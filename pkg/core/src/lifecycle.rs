use tracing::info;

use pkg_constants::defaults::DEFAULT_HISTORY_LIMIT;
use pkg_constants::names::stack_name;
use pkg_types::metadata::ObjectMeta;
use pkg_types::stack::{Stack, StackStatus};

use crate::container::StackSetContainer;

/// Synthesizes the Stack for the StackSet's current template revision, or
/// `None` when the revision was already materialized. The name is
/// deterministic from (stackset, version), and the tick's stack listing is
/// consulted first, so repeated ticks with unchanged input never produce a
/// duplicate. Returns the stack together with the version to persist as
/// observed once creation succeeds.
pub fn new_stack(ssc: &StackSetContainer) -> Option<(Stack, String)> {
    let version = ssc.stackset.spec.stack_template.version.clone();
    if version.is_empty() {
        return None;
    }
    if ssc.stackset.status.observed_stack_version == version {
        return None;
    }

    let name = stack_name(ssc.name(), &version);
    if ssc.stack_containers.values().any(|sc| sc.name() == name) {
        return None;
    }

    let mut metadata = ObjectMeta::new(&name, ssc.namespace()).owned_by(
        "StackSet",
        ssc.name(),
        &ssc.stackset.metadata.uid,
    );
    metadata
        .labels
        .insert("stackset".to_string(), ssc.name().to_string());
    metadata
        .labels
        .insert("stack-version".to_string(), version.clone());

    let stack = Stack {
        metadata,
        spec: ssc.stackset.spec.stack_template.spec.clone(),
        status: StackStatus::default(),
    };
    Some((stack, version))
}

/// Flags PendingRemoval on stacks that carry zero configured and zero
/// observed traffic and fall outside the retention window, oldest first.
/// The current template revision and any stack with traffic are never
/// flagged, so a live target cannot be deleted.
pub fn mark_expired_stacks(ssc: &mut StackSetContainer) {
    let limit = ssc
        .stackset
        .spec
        .stack_lifecycle
        .history_limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT);
    let current = stack_name(ssc.name(), &ssc.stackset.spec.stack_template.version);

    let mut candidates: Vec<(String, chrono::DateTime<chrono::Utc>)> = ssc
        .stack_containers
        .values()
        .filter(|sc| !sc.has_traffic() && sc.name() != current)
        .map(|sc| (sc.uid().to_string(), sc.stack.created_at()))
        .collect();
    if candidates.len() <= limit {
        return;
    }

    candidates.sort_by_key(|(_, created_at)| *created_at);
    let excess = candidates.len() - limit;
    let stackset = ssc.name().to_string();
    for (uid, _) in candidates.into_iter().take(excess) {
        if let Some(sc) = ssc.stack_containers.get_mut(&uid) {
            info!(
                stackset = %stackset,
                stack = %sc.stack.metadata.name,
                "marking expired stack for removal"
            );
            sc.pending_removal = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::StackContainer;
    use crate::container::testutil::*;
    use crate::traffic::TrafficReconciler;

    #[test]
    fn new_stack_created_when_revision_advances() {
        let ssc = make_container(TrafficReconciler::Simple, vec![]);
        // make_container uses template version v9 and no observed version.
        let (stack, version) = new_stack(&ssc).expect("expected a new stack");
        assert_eq!(stack.metadata.name, "app-v9");
        assert_eq!(version, "v9");
        assert_eq!(stack.metadata.owner_references.len(), 1);
        assert_eq!(stack.metadata.owner_references[0].kind, "StackSet");
    }

    #[test]
    fn new_stack_skipped_when_version_already_observed() {
        let mut ssc = make_container(TrafficReconciler::Simple, vec![]);
        ssc.stackset.status.observed_stack_version = "v9".to_string();
        assert!(new_stack(&ssc).is_none());
    }

    #[test]
    fn new_stack_skipped_when_stack_already_listed() {
        let mut ssc = make_container(TrafficReconciler::Simple, vec![]);
        let existing = StackContainer::new(make_stack("app-v9", 5));
        ssc.stack_containers
            .insert(existing.uid().to_string(), existing);
        assert!(new_stack(&ssc).is_none());
    }

    #[test]
    fn expired_stacks_flagged_oldest_first_beyond_limit() {
        let mut ssc = make_container(
            TrafficReconciler::Simple,
            vec![
                (make_stack("app-v1", 400), 0.0, 0.0),
                (make_stack("app-v2", 300), 0.0, 0.0),
                (make_stack("app-v3", 200), 0.0, 0.0),
                (make_stack("app-v4", 100), 100.0, 100.0),
            ],
        );
        ssc.stackset.spec.stack_lifecycle.history_limit = Some(2);
        mark_expired_stacks(&mut ssc);

        let flagged: Vec<&str> = ssc
            .stack_containers
            .values()
            .filter(|sc| sc.pending_removal)
            .map(|sc| sc.name())
            .collect();
        assert_eq!(flagged, vec!["app-v1"]);
    }

    #[test]
    fn stack_with_traffic_never_flagged() {
        let mut ssc = make_container(
            TrafficReconciler::Simple,
            vec![
                (make_stack("app-v1", 400), 0.0, 5.0),
                (make_stack("app-v2", 300), 0.0, 0.0),
                (make_stack("app-v3", 200), 0.0, 0.0),
                (make_stack("app-v4", 100), 100.0, 95.0),
            ],
        );
        ssc.stackset.spec.stack_lifecycle.history_limit = Some(0);
        mark_expired_stacks(&mut ssc);

        let v1 = ssc
            .stack_containers
            .values()
            .find(|sc| sc.name() == "app-v1")
            .unwrap();
        assert!(
            !v1.pending_removal,
            "a stack still observing traffic must never be deleted"
        );
        let v2 = ssc
            .stack_containers
            .values()
            .find(|sc| sc.name() == "app-v2")
            .unwrap();
        assert!(v2.pending_removal);
    }

    #[test]
    fn current_revision_never_flagged() {
        // Template version is v9; an existing idle app-v9 must survive even
        // beyond the retention window.
        let mut ssc = make_container(
            TrafficReconciler::Simple,
            vec![
                (make_stack("app-v9", 400), 0.0, 0.0),
                (make_stack("app-v8", 300), 0.0, 0.0),
            ],
        );
        ssc.stackset.spec.stack_lifecycle.history_limit = Some(0);
        mark_expired_stacks(&mut ssc);

        let v9 = ssc
            .stack_containers
            .values()
            .find(|sc| sc.name() == "app-v9")
            .unwrap();
        assert!(!v9.pending_removal);
    }
}
