pub mod server;

use std::sync::Arc;

use pkg_controllers::stackset::Health;
use pkg_metrics::MetricsRegistry;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<Health>,
    pub metrics: Arc<MetricsRegistry>,
}
