use std::sync::Arc;

use fleetd::config::CoordinatorConfig;
use fleetd::http::coordinator::{router, CoordinatorState};
use fleetd::placement::PlacementMap;
use fleetd::registry::AgentRegistry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match CoordinatorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(AgentRegistry::new(config.heartbeat_timeout));
    let placements = Arc::new(PlacementMap::new());
    let cancel = CancellationToken::new();

    tokio::spawn(registry.clone().run_expiry_loop(cancel.clone()));

    let state = CoordinatorState {
        registry,
        placements,
        config: Arc::new(config.clone()),
        http_client: reqwest::Client::new(),
    };

    let app = router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: failed to bind {addr}: {e:#}");
            std::process::exit(1);
        }
    };

    info!(addr, "coordinator listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        })
        .await
        .expect("server error");
}
