pub mod monitor;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bollard::Docker;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::docker::container;
use crate::error::WorkerError;
use crate::placement::DeploymentStatus;

/// One host-side binding for a published container port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// Container port + protocol (e.g. "8080/tcp") to its host bindings.
pub type MappedPorts = BTreeMap<String, Vec<HostBinding>>;

/// The worker's view of one deployment: a running (or finished) container,
/// its accumulated log buffer, and its current status.
pub struct DeploymentTask {
    pub container_id: String,
    pub image: String,
    pub logs: Mutex<String>,
    pub status: Mutex<DeploymentStatus>,
    pub mapped_ports: MappedPorts,
}

/// Process-wide Free/Busy scalar. A worker reports Busy iff at least one
/// task is `running`; both the monitor and the cancel handler may transition
/// it back to Free, but only one terminal transition occurs per task, so a
/// double write is idempotent.
pub struct AgentAvailability(AtomicBool);

impl AgentAvailability {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_busy(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn set_free(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn as_state(&self) -> crate::registry::AgentState {
        if self.is_busy() {
            crate::registry::AgentState::Busy
        } else {
            crate::registry::AgentState::Free
        }
    }
}

impl Default for AgentAvailability {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared worker state: config, Docker client, the one-task-at-a-time
/// availability scalar, and the deployment-task map this worker exclusively
/// owns.
#[derive(Clone)]
pub struct WorkerState {
    pub config: Arc<WorkerConfig>,
    pub docker: Arc<Docker>,
    pub availability: Arc<AgentAvailability>,
    pub tasks: Arc<Mutex<HashMap<String, Arc<DeploymentTask>>>>,
}

impl WorkerState {
    pub fn new(config: WorkerConfig, docker: Docker) -> Self {
        Self {
            config: Arc::new(config),
            docker: Arc::new(docker),
            availability: Arc::new(AgentAvailability::new()),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `start(image, container_name)`: reject if busy, otherwise create and
    /// start a detached container publishing all exposed ports, register
    /// the task, and spawn its monitor. Any failure before the task is
    /// registered rolls `AgentAvailability` back to Free.
    pub async fn start_deployment(
        &self,
        image: String,
        container_name: String,
    ) -> Result<(String, MappedPorts), WorkerError> {
        if self.availability.is_busy() {
            return Err(WorkerError::AgentBusy);
        }
        self.availability.set_busy();

        let created = container::create_and_start(&self.docker, &image, &container_name)
            .await
            .map_err(|e| {
                self.availability.set_free();
                WorkerError::RuntimeError(e.to_string())
            })?;

        let deployment_id = Uuid::new_v4().to_string();
        let task = Arc::new(DeploymentTask {
            container_id: created.container_id.clone(),
            image: image.clone(),
            logs: Mutex::new(String::new()),
            status: Mutex::new(DeploymentStatus::Running),
            mapped_ports: created.mapped_ports.clone(),
        });

        self.tasks
            .lock()
            .await
            .insert(deployment_id.clone(), task.clone());

        monitor::spawn(self.clone(), deployment_id.clone(), task.clone());

        Ok((deployment_id, created.mapped_ports))
    }

    /// `logs(deployment_id)`: a consistent snapshot -- the log buffer is
    /// captured first, then status and ports are read.
    pub async fn logs(
        &self,
        deployment_id: &str,
    ) -> Result<(DeploymentStatus, String, MappedPorts), WorkerError> {
        let task = self.task(deployment_id).await?;
        let logs = task.logs.lock().await.clone();
        let status = *task.status.lock().await;
        Ok((status, logs, task.mapped_ports.clone()))
    }

    /// `cancel(deployment_id)`: idempotent on an already-terminal task.
    /// Otherwise request a stop and mark `cancelled`; the lock is released
    /// across the stop call (never hold a lock across runtime I/O) and
    /// re-checked after, so a monitor that reached a terminal status while
    /// the stop was in flight is never overwritten.
    pub async fn cancel(&self, deployment_id: &str) -> Result<DeploymentStatus, WorkerError> {
        let task = self.task(deployment_id).await?;

        {
            let status = task.status.lock().await;
            if status.is_terminal() {
                return Ok(*status);
            }
        }

        container::stop(&self.docker, &task.container_id)
            .await
            .map_err(|e| WorkerError::RuntimeError(e.to_string()))?;

        Ok(finalize_cancelled(&task, &self.availability).await)
    }

    /// Stop every still-running task's container. Called once on shutdown so
    /// an agent process exit doesn't leave orphaned containers behind.
    pub async fn shutdown_all(&self) {
        let tasks: Vec<Arc<DeploymentTask>> = self.tasks.lock().await.values().cloned().collect();
        for task in tasks {
            let status = task.status.lock().await;
            if status.is_terminal() {
                continue;
            }
            drop(status);
            if let Err(e) = container::stop(&self.docker, &task.container_id).await {
                tracing::warn!(container_id = %task.container_id, error = %e, "shutdown: failed to stop container");
            }
        }
    }

    async fn task(&self, deployment_id: &str) -> Result<Arc<DeploymentTask>, WorkerError> {
        self.tasks
            .lock()
            .await
            .get(deployment_id)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownDeployment(deployment_id.to_string()))
    }
}

/// The losing half of the cancel-vs-monitor race: marks `cancelled` only if
/// the task hasn't already reached a terminal status in the meantime. Pulled
/// out of `cancel()` so the race itself is exercisable without a live
/// runtime's `stop()` call.
async fn finalize_cancelled(task: &DeploymentTask, availability: &AgentAvailability) -> DeploymentStatus {
    let mut status = task.status.lock().await;
    if !status.is_terminal() {
        *status = DeploymentStatus::Cancelled;
        availability.set_free();
    }
    *status
}
