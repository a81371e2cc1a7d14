use anyhow::bail;

use crate::WEIGHT_EPSILON;
use crate::container::StackSetContainer;

/// Assigns each stack its cumulative [lower, upper) slice of the shared
/// routing object and returns the order in which segment resources must be
/// written this tick.
///
/// Intervals are laid out in stack creation order, so unchanged weights
/// produce byte-identical segments tick after tick. The write order is
/// ascending weight-change magnitude with creation order as tie-break;
/// writing the smallest moves first keeps the partition free of gaps and
/// overlaps while the cutover is in progress.
///
/// Fails without touching any segment state when the weights cannot form a
/// valid partition of 100%.
pub fn compute_traffic_segments(ssc: &mut StackSetContainer) -> anyhow::Result<Vec<String>> {
    let mut total = 0.0;
    for sc in ssc.stack_containers.values() {
        let w = sc.effective_traffic_weight;
        if !w.is_finite() || w < -WEIGHT_EPSILON {
            bail!(
                "stack {} has invalid traffic weight {}",
                sc.stack.metadata.name,
                w
            );
        }
        total += w;
    }
    if total > 100.0 + WEIGHT_EPSILON {
        bail!(
            "traffic weights sum to {:.1}%, cannot partition 100%",
            total
        );
    }

    let creation_order: Vec<String> = ssc
        .stacks_in_creation_order()
        .iter()
        .map(|sc| sc.uid().to_string())
        .collect();

    let mut lower = 0.0;
    for uid in &creation_order {
        if let Some(sc) = ssc.stack_containers.get_mut(uid) {
            let upper = lower + sc.effective_traffic_weight;
            sc.segment_range = Some((lower, upper));
            lower = upper;
        }
    }

    let mut to_update: Vec<(f64, usize, String)> = creation_order
        .iter()
        .enumerate()
        .filter_map(|(position, uid)| {
            let sc = ssc.stack_containers.get(uid)?;
            let change = (sc.effective_traffic_weight - sc.actual_traffic_weight).abs();
            (change > WEIGHT_EPSILON).then(|| (change, position, uid.clone()))
        })
        .collect();
    to_update.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });

    Ok(to_update.into_iter().map(|(_, _, uid)| uid).collect())
}
