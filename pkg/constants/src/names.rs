//! Naming conventions for generated resources.

/// Name suffix distinguishing a per-stack traffic-segment routing object
/// from the main routing object of the same stack.
pub const SEGMENT_SUFFIX: &str = "-traffic-segment";

/// Builds the deterministic Stack name for a StackSet revision. Re-running
/// the computation for the same inputs always yields the same name.
pub fn stack_name(stackset: &str, version: &str) -> String {
    format!("{}-{}", stackset, version)
}
