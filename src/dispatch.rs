use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;
use crate::placement::{Deployment, DeploymentStatus, PlacementMap};
use crate::registry::AgentRegistry;
use crate::worker::MappedPorts;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct StartRequest<'a> {
    image: &'a str,
    container_name: String,
}

#[derive(Deserialize)]
struct StartResponse {
    deployment_id: String,
    mapped_ports: MappedPorts,
}

/// §4.3: select a worker, hand it the image, and record the placement.
/// Single-shot -- a dispatch failure is surfaced as-is, with no retry
/// against a second candidate.
pub async fn dispatch(
    http_client: &reqwest::Client,
    registry: &AgentRegistry,
    placements: &PlacementMap,
    image_tag: &str,
) -> Result<(String, String, MappedPorts), CoordinatorError> {
    let (_agent_id, agent) = registry
        .select_worker()
        .await
        .ok_or(CoordinatorError::NoAgentsAvailable)?;

    let container_name = format!("{image_tag}_container");
    let url = format!("http://{}/start_deployment", agent.endpoint);
    let response = http_client
        .post(&url)
        .json(&StartRequest {
            image: image_tag,
            container_name,
        })
        .timeout(DISPATCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| CoordinatorError::DispatchFailed(e.to_string()))?;

    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CoordinatorError::DispatchFailed(body));
    }

    let parsed: StartResponse = response
        .json()
        .await
        .map_err(|e| CoordinatorError::DispatchFailed(e.to_string()))?;

    placements
        .insert(
            parsed.deployment_id.clone(),
            Deployment {
                agent_endpoint: agent.endpoint.clone(),
                image_tag: image_tag.to_string(),
                mapped_ports: parsed.mapped_ports.clone(),
                status: DeploymentStatus::Running,
            },
        )
        .await;

    Ok((parsed.deployment_id, agent.endpoint, parsed.mapped_ports))
}
