use std::sync::Arc;

use bollard::query_parameters::LogsOptions;
use futures_util::StreamExt;
use tracing::{info, warn};

use crate::docker::container;
use crate::placement::DeploymentStatus;

use super::{DeploymentTask, WorkerState};

/// Spawn the background task that owns a deployment's terminal transition:
/// stream logs until the container exits, record the exit status (unless
/// cancellation already claimed it), clean up, and free the worker.
pub fn spawn(state: WorkerState, deployment_id: String, task: Arc<DeploymentTask>) {
    tokio::spawn(async move {
        stream_logs(&state, &task).await;

        let exit_code = match container::wait_for_exit(&state.docker, &task.container_id).await {
            Ok(code) => Some(code),
            Err(e) => {
                warn!(deployment_id, error = %e, "container wait failed");
                None
            }
        };

        {
            let mut status = task.status.lock().await;
            if !status.is_terminal() {
                *status = match exit_code {
                    Some(0) => DeploymentStatus::Completed,
                    _ => DeploymentStatus::Failed,
                };
            }
            info!(deployment_id, status = ?*status, "deployment reached terminal status");
        }

        cleanup(&state, &task, &deployment_id).await;
        state.availability.set_free();
    });
}

async fn stream_logs(state: &WorkerState, task: &Arc<DeploymentTask>) {
    let options = LogsOptions {
        follow: true,
        stdout: true,
        stderr: true,
        ..Default::default()
    };
    let mut stream = state.docker.logs(&task.container_id, Some(options));

    while let Some(item) = stream.next().await {
        match item {
            Ok(output) => {
                use bollard::container::LogOutput;
                let bytes = match &output {
                    LogOutput::StdOut { message } | LogOutput::StdErr { message } => message,
                    _ => continue,
                };
                let text = String::from_utf8_lossy(bytes);
                task.logs.lock().await.push_str(&text);
            }
            Err(e) => {
                task.logs
                    .lock()
                    .await
                    .push_str(&format!("\nError during log streaming: {e}\n"));
                break;
            }
        }
    }
}

async fn cleanup(state: &WorkerState, task: &Arc<DeploymentTask>, deployment_id: &str) {
    if let Err(e) = container::remove_container(&state.docker, &task.container_id).await {
        warn!(deployment_id, error = %e, "cleanup: container removal failed");
        task.logs
            .lock()
            .await
            .push_str(&format!("\nCleanup error: {e}\n"));
    }
    if let Err(e) = container::remove_image(&state.docker, &task.image).await {
        warn!(deployment_id, error = %e, "cleanup: image removal failed");
        task.logs
            .lock()
            .await
            .push_str(&format!("\nCleanup error: {e}\n"));
    }
}
