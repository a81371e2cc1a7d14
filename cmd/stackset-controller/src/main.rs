use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use pkg_api::{AppState, server::start_probe_server};
use pkg_constants::annotations::DEFAULT_BACKEND_WEIGHTS_ANNOTATION_KEY;
use pkg_constants::defaults::{
    DEFAULT_INTERVAL_SECS, DEFAULT_PROBE_ADDR, DEFAULT_RECONCILE_WORKERS,
};
use pkg_controllers::stackset::{StackSetConfig, StackSetController};
use pkg_metrics::MetricsRegistry;
use pkg_state::store::InMemoryApi;
use pkg_types::config::{ControllerConfigFile, load_config_file};

#[derive(Parser, Debug)]
#[command(name = "stackset-controller", about = "StackSet deployment controller")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = "/etc/stackset-controller/config.yaml")]
    config: String,

    /// Namespace the controller operates in
    #[arg(long)]
    namespace: Option<String>,

    /// Controller identity for StackSet ownership
    #[arg(long)]
    controller_id: Option<String>,

    /// Reconciliation interval in seconds
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Number of StackSets reconciled concurrently
    #[arg(long)]
    reconcile_workers: Option<usize>,

    /// Listen address for the health and metrics endpoints
    #[arg(long)]
    probe_addr: Option<String>,

    /// Enable route group support
    #[arg(long)]
    enable_route_groups: bool,

    /// Enable config map reference sync
    #[arg(long)]
    enable_config_maps: bool,

    /// Enable secret reference sync
    #[arg(long)]
    enable_secrets: bool,

    /// Enable platform credentials set support
    #[arg(long)]
    enable_credentials_sets: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ControllerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let config = StackSetConfig {
        namespace: cli
            .namespace
            .or(file_cfg.namespace)
            .unwrap_or_else(|| "default".to_string()),
        controller_id: cli
            .controller_id
            .or(file_cfg.controller_id)
            .unwrap_or_default(),
        interval: Duration::from_secs(
            cli.interval_secs
                .or(file_cfg.interval_secs)
                .unwrap_or(DEFAULT_INTERVAL_SECS),
        ),
        reconcile_workers: cli
            .reconcile_workers
            .or(file_cfg.reconcile_workers)
            .unwrap_or(DEFAULT_RECONCILE_WORKERS),
        backend_weights_annotation_key: file_cfg
            .backend_weights_annotation_key
            .unwrap_or_else(|| DEFAULT_BACKEND_WEIGHTS_ANNOTATION_KEY.to_string()),
        route_group_support_enabled: cli.enable_route_groups
            || file_cfg.enable_route_groups.unwrap_or(false),
        config_map_support_enabled: cli.enable_config_maps
            || file_cfg.enable_config_maps.unwrap_or(false),
        secret_support_enabled: cli.enable_secrets || file_cfg.enable_secrets.unwrap_or(false),
        credentials_support_enabled: cli.enable_credentials_sets
            || file_cfg.enable_credentials_sets.unwrap_or(false),
    };
    let probe_addr: SocketAddr = cli
        .probe_addr
        .or(file_cfg.probe_addr)
        .unwrap_or_else(|| DEFAULT_PROBE_ADDR.to_string())
        .parse()?;

    info!("Starting stackset-controller");
    info!("  Namespace:  {}", config.namespace);
    info!("  Controller: {:?}", config.controller_id);
    info!("  Interval:   {}s", config.interval.as_secs());
    info!("  Workers:    {}", config.reconcile_workers);

    let api = Arc::new(InMemoryApi::new());
    let metrics = Arc::new(MetricsRegistry::new());
    let controller = StackSetController::new(
        api.clone(),
        api.watch_feed(),
        config,
        metrics.clone(),
    );

    let probe_state = AppState {
        health: controller.health(),
        metrics,
    };
    tokio::spawn(async move {
        if let Err(e) = start_probe_server(probe_addr, probe_state).await {
            tracing::error!("Probe server failed: {:#}", e);
        }
    });

    // Flip the shutdown signal on ctrl-c; in-flight work finishes on its own.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    controller.run(shutdown_rx).await
}
