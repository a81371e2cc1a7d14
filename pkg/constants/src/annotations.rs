//! Annotation keys read and written by the controller.

/// Marks which controller instance owns a StackSet. A StackSet without this
/// annotation belongs to the controller running with an empty controller id.
pub const CONTROLLER_ANNOTATION_KEY: &str = "stackset-controller/controller";

/// Opt-in for the prescaling traffic reconciler on a StackSet.
pub const PRESCALE_STACKS_ANNOTATION_KEY: &str = "alpha.stackset-controller/prescale-stacks";

/// Per-StackSet override for how long the raised autoscaler minimum is held
/// after a traffic increase completes. Value is in seconds.
pub const RESET_MIN_REPLICAS_DELAY_ANNOTATION_KEY: &str =
    "alpha.stackset-controller/reset-min-replicas-delay";

/// Timestamp stamped on every child resource the controller creates or
/// updates. Excluded from the convergence diff.
pub const CONTROLLER_LAST_UPDATED_ANNOTATION_KEY: &str =
    "stackset-controller/updated-timestamp";

/// Default annotation key on the shared routing object holding the actual
/// backend weights as a JSON map of stack name to weight.
pub const DEFAULT_BACKEND_WEIGHTS_ANNOTATION_KEY: &str =
    "stackset-controller/backend-weights";

/// Annotation on a segment routing object recording the `lower-upper`
/// weight interval that object serves.
pub const TRAFFIC_SEGMENT_ANNOTATION_KEY: &str = "stackset-controller/traffic-segment";
