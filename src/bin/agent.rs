use bollard::Docker;
use fleetd::config::WorkerConfig;
use fleetd::heartbeat;
use fleetd::http::worker::router;
use fleetd::worker::WorkerState;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    let docker = match Docker::connect_with_local_defaults() {
        Ok(docker) => docker,
        Err(e) => {
            eprintln!("Error: failed to connect to the container runtime: {e:#}");
            std::process::exit(1);
        }
    };

    let port = config.agent_port;
    let state = WorkerState::new(config, docker);
    let cancel = CancellationToken::new();

    tokio::spawn(heartbeat::run(
        state.clone(),
        reqwest::Client::new(),
        heartbeat::generate_agent_id(),
        cancel.clone(),
    ));

    let app = router(state.clone());
    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: failed to bind {addr}: {e:#}");
            std::process::exit(1);
        }
    };

    info!(addr, "agent listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        })
        .await
        .expect("server error");

    state.shutdown_all().await;
}
