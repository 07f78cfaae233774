use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::worker::MappedPorts;

/// Lifecycle status shared by the coordinator's placement map and the
/// worker's task map. Once terminal (anything but `running`), it never
/// changes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Running,
    Cancelled,
    Completed,
    Failed,
    Unknown,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeploymentStatus::Running)
    }
}

/// The coordinator's record of one deployment: which worker owns it and
/// where it last reported being.
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub agent_endpoint: String,
    pub image_tag: String,
    pub mapped_ports: MappedPorts,
    pub status: DeploymentStatus,
}

/// The coordinator's deployment placement map: a single mutex-guarded map,
/// same discipline as the agent registry. Never garbage-collected
/// automatically (see design notes on in-memory ephemeral growth).
pub struct PlacementMap {
    placements: Mutex<HashMap<String, Deployment>>,
}

impl PlacementMap {
    pub fn new() -> Self {
        Self {
            placements: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, deployment_id: String, deployment: Deployment) {
        self.placements.lock().await.insert(deployment_id, deployment);
    }

    pub async fn get(&self, deployment_id: &str) -> Option<Deployment> {
        self.placements.lock().await.get(deployment_id).cloned()
    }

    pub async fn set_status(&self, deployment_id: &str, status: DeploymentStatus) {
        if let Some(entry) = self.placements.lock().await.get_mut(deployment_id) {
            entry.status = status;
        }
    }

    pub async fn list(&self) -> HashMap<String, Deployment> {
        self.placements.lock().await.clone()
    }
}

impl Default for PlacementMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample(status: DeploymentStatus) -> Deployment {
        Deployment {
            agent_endpoint: "10.0.0.4:5001".to_string(),
            image_tag: "user_code_image_abcdef12".to_string(),
            mapped_ports: BTreeMap::new(),
            status,
        }
    }

    #[tokio::test]
    async fn set_status_updates_existing_entry() {
        let placements = PlacementMap::new();
        placements
            .insert("dep-1".to_string(), sample(DeploymentStatus::Running))
            .await;

        placements
            .set_status("dep-1", DeploymentStatus::Cancelled)
            .await;

        let entry = placements.get("dep-1").await.unwrap();
        assert_eq!(entry.status, DeploymentStatus::Cancelled);
    }

    #[tokio::test]
    async fn set_status_on_unknown_id_is_a_no_op() {
        let placements = PlacementMap::new();
        placements
            .set_status("missing", DeploymentStatus::Cancelled)
            .await;
        assert!(placements.get("missing").await.is_none());
    }
}
