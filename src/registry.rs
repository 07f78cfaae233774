use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Free/Busy availability, reported by a worker and mirrored in its
/// `AgentRecord` on the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Free,
    Busy,
}

/// One known worker, as seen by the coordinator.
#[derive(Debug, Serialize)]
pub struct AgentRecord {
    pub endpoint: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub state: AgentState,
    #[serde(skip)]
    pub last_seen: Instant,
    pub reputation: i64,
}

/// The coordinator's live agent registry: a single mutex-guarded map.
///
/// Heartbeat upsert, expiry scan, and selection each hold the lock for the
/// duration of their read/write and never across network I/O.
pub struct AgentRegistry {
    agents: Mutex<HashMap<String, AgentRecord>>,
    heartbeat_timeout: Duration,
}

impl AgentRegistry {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            heartbeat_timeout,
        }
    }

    /// Upsert a heartbeat. The newest payload fully replaces the prior
    /// record -- no field-level merge.
    pub async fn record_heartbeat(
        &self,
        agent_id: String,
        endpoint: String,
        cpu_percent: f64,
        memory_percent: f64,
        state: AgentState,
        reputation: Option<i64>,
    ) {
        let mut agents = self.agents.lock().await;
        let reputation = reputation.unwrap_or(50);
        agents.insert(
            agent_id,
            AgentRecord {
                endpoint,
                cpu_percent,
                memory_percent,
                state,
                last_seen: Instant::now(),
                reputation,
            },
        );
    }

    /// Point-in-time copy of the whole registry.
    pub async fn list_agents(&self) -> HashMap<String, AgentRecord> {
        self.agents.lock().await.clone()
    }

    /// Selection policy: fresh and Free, minimum cpu_percent, ties broken by
    /// minimum memory_percent then lexicographically smallest agent_id.
    pub async fn select_worker(&self) -> Option<(String, AgentRecord)> {
        let agents = self.agents.lock().await;
        let now = Instant::now();
        agents
            .iter()
            .filter(|(_, record)| {
                record.state == AgentState::Free
                    && now.duration_since(record.last_seen) < self.heartbeat_timeout
            })
            .min_by(|(id_a, a), (id_b, b)| {
                a.cpu_percent
                    .total_cmp(&b.cpu_percent)
                    .then_with(|| a.memory_percent.total_cmp(&b.memory_percent))
                    .then_with(|| id_a.cmp(id_b))
            })
            .map(|(id, record)| (id.clone(), record.clone()))
    }

    /// Remove records whose `last_seen` predates the timeout. Silent to the
    /// owning agent -- its next heartbeat simply re-registers it.
    async fn expire_stale(&self) {
        let mut agents = self.agents.lock().await;
        let now = Instant::now();
        let timeout = self.heartbeat_timeout;
        agents.retain(|agent_id, record| {
            let fresh = now.duration_since(record.last_seen) < timeout;
            if !fresh {
                info!(agent_id, "removing stale agent");
            }
            fresh
        });
    }

    /// Background task: scan for stale agents every `heartbeat_timeout`.
    pub async fn run_expiry_loop(self: std::sync::Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.heartbeat_timeout);
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.expire_stale().await,
            }
        }
    }
}

impl Clone for AgentRecord {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            cpu_percent: self.cpu_percent,
            memory_percent: self.memory_percent,
            state: self.state,
            last_seen: self.last_seen,
            reputation: self.reputation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn heartbeat(
        registry: &AgentRegistry,
        agent_id: &str,
        cpu: f64,
        memory: f64,
        state: AgentState,
    ) {
        registry
            .record_heartbeat(
                agent_id.to_string(),
                format!("{agent_id}.local:5001"),
                cpu,
                memory,
                state,
                None,
            )
            .await;
    }

    #[tokio::test]
    async fn selection_picks_minimum_cpu() {
        let registry = AgentRegistry::new(Duration::from_secs(10));
        heartbeat(&registry, "a", 20.0, 10.0, AgentState::Free).await;
        heartbeat(&registry, "b", 5.0, 10.0, AgentState::Free).await;

        let (id, _) = registry.select_worker().await.expect("a candidate exists");
        assert_eq!(id, "b");
    }

    #[tokio::test]
    async fn selection_ignores_busy_agents() {
        let registry = AgentRegistry::new(Duration::from_secs(10));
        heartbeat(&registry, "a", 1.0, 1.0, AgentState::Busy).await;

        assert!(registry.select_worker().await.is_none());
    }

    #[tokio::test]
    async fn selection_breaks_ties_by_memory_then_id() {
        let registry = AgentRegistry::new(Duration::from_secs(10));
        heartbeat(&registry, "z", 10.0, 10.0, AgentState::Free).await;
        heartbeat(&registry, "a", 10.0, 10.0, AgentState::Free).await;
        heartbeat(&registry, "m", 10.0, 5.0, AgentState::Free).await;

        let (id, _) = registry.select_worker().await.unwrap();
        assert_eq!(id, "m", "lowest memory_percent should win the cpu tie");
    }

    #[tokio::test]
    async fn heartbeat_is_idempotent_except_last_seen() {
        let registry = AgentRegistry::new(Duration::from_secs(10));
        heartbeat(&registry, "a", 5.0, 5.0, AgentState::Free).await;
        heartbeat(&registry, "a", 5.0, 5.0, AgentState::Free).await;

        let agents = registry.list_agents().await;
        assert_eq!(agents.len(), 1, "repeated heartbeats must not duplicate");
    }

    #[tokio::test]
    async fn newest_heartbeat_fully_replaces_prior_record() {
        let registry = AgentRegistry::new(Duration::from_secs(10));
        heartbeat(&registry, "a", 90.0, 90.0, AgentState::Busy).await;
        heartbeat(&registry, "a", 1.0, 1.0, AgentState::Free).await;

        let agents = registry.list_agents().await;
        let record = &agents["a"];
        assert_eq!(record.cpu_percent, 1.0);
        assert_eq!(record.state, AgentState::Free);
    }

    #[tokio::test]
    async fn omitted_reputation_resets_to_default_instead_of_inheriting() {
        let registry = AgentRegistry::new(Duration::from_secs(10));
        registry
            .record_heartbeat(
                "a".to_string(),
                "a.local:5001".to_string(),
                5.0,
                5.0,
                AgentState::Free,
                Some(90),
            )
            .await;
        registry
            .record_heartbeat(
                "a".to_string(),
                "a.local:5001".to_string(),
                5.0,
                5.0,
                AgentState::Free,
                None,
            )
            .await;

        let agents = registry.list_agents().await;
        assert_eq!(
            agents["a"].reputation, 50,
            "an omitted reputation must reset to the default, not inherit the prior value"
        );
    }

    #[tokio::test]
    async fn expiry_removes_only_stale_records() {
        let registry = AgentRegistry::new(Duration::from_millis(20));
        heartbeat(&registry, "stale", 1.0, 1.0, AgentState::Free).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        heartbeat(&registry, "fresh", 1.0, 1.0, AgentState::Free).await;

        registry.expire_stale().await;

        let agents = registry.list_agents().await;
        assert!(!agents.contains_key("stale"));
        assert!(agents.contains_key("fresh"));
    }
}
