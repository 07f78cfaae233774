use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sysinfo::System;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::worker::WorkerState;

const HEARTBEAT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct HeartbeatPayload<'a> {
    agent_id: &'a str,
    ip: &'a str,
    cpu: f32,
    memory: f32,
    state: crate::registry::AgentState,
}

/// Samples process-wide CPU/memory and posts to the coordinator. Never
/// terminates on a failed send -- transport errors are logged and swallowed.
pub async fn run(
    state: WorkerState,
    http_client: reqwest::Client,
    agent_id: String,
    cancel: CancellationToken,
) {
    let system = Arc::new(Mutex::new(System::new_all()));
    let mut interval = tokio::time::interval(state.config.heartbeat_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let (cpu, memory) = sample_usage(&system).await;
                let payload = HeartbeatPayload {
                    agent_id: &agent_id,
                    ip: &state.config.agent_ip,
                    cpu,
                    memory,
                    state: state.availability.as_state(),
                };
                send(&http_client, &state.config.scheduler_url, &payload).await;
            }
        }
    }
}

async fn sample_usage(system: &Arc<Mutex<System>>) -> (f32, f32) {
    let mut system = system.lock().await;
    system.refresh_cpu_usage();
    system.refresh_memory();
    let cpu = system.global_cpu_usage();
    let memory = if system.total_memory() == 0 {
        0.0
    } else {
        (system.used_memory() as f32 / system.total_memory() as f32) * 100.0
    };
    (cpu, memory)
}

async fn send(http_client: &reqwest::Client, scheduler_url: &str, payload: &HeartbeatPayload<'_>) {
    let url = format!("{scheduler_url}/heartbeat");
    let result = http_client
        .post(&url)
        .json(payload)
        .timeout(HEARTBEAT_SEND_TIMEOUT)
        .send()
        .await;

    if let Err(e) = result {
        warn!(error = %e, "heartbeat send failed");
    }
}

/// Generate a stable agent identity for the lifetime of this process.
pub fn generate_agent_id() -> String {
    Uuid::new_v4().to_string()
}
