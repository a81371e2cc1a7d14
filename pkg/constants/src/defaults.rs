//! Default tunables for the reconciliation driver.

/// How often the driver runs a full reconciliation tick, in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 10;

/// Number of StackSets reconciled concurrently per tick.
pub const DEFAULT_RECONCILE_WORKERS: usize = 10;

/// How long a raised autoscaler minimum is held after a prescaled traffic
/// increase completes, in seconds (10 minutes).
pub const DEFAULT_RESET_MIN_REPLICAS_DELAY_SECS: u64 = 600;

/// The liveness probe fails when the last tick start is older than
/// `interval * LIVENESS_INTERVAL_MULTIPLIER`.
pub const LIVENESS_INTERVAL_MULTIPLIER: u32 = 5;

/// Number of retired zero-traffic stacks kept around per StackSet when the
/// StackSet does not configure its own history limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 3;

/// Default listen address for the health and metrics endpoints.
pub const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:7979";
