use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::bundle;
use crate::config::CoordinatorConfig;
use crate::dispatch;
use crate::error::CoordinatorError;
use crate::placement::{DeploymentStatus, PlacementMap};
use crate::registry::{AgentRegistry, AgentState};

const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct CoordinatorState {
    pub registry: Arc<AgentRegistry>,
    pub placements: Arc<PlacementMap>,
    pub config: Arc<CoordinatorConfig>,
    pub http_client: reqwest::Client,
}

pub fn router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/heartbeat", post(heartbeat))
        .route("/upload_code", post(upload_code))
        .route("/deployment_logs", get(deployment_logs))
        .route("/cancel_deployment", post(cancel_deployment))
        .route("/agents", get(agents))
        .route("/deployments", get(deployments))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct HeartbeatRequest {
    agent_id: Option<String>,
    ip: Option<String>,
    cpu: Option<f64>,
    memory: Option<f64>,
    state: Option<AgentState>,
    reputation: Option<i64>,
}

async fn heartbeat(
    State(state): State<CoordinatorState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<serde_json::Value>, CoordinatorError> {
    let agent_id = req
        .agent_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CoordinatorError::BadRequest("No agent_id provided".to_string()))?;

    state
        .registry
        .record_heartbeat(
            agent_id,
            req.ip.unwrap_or_default(),
            req.cpu.unwrap_or(0.0),
            req.memory.unwrap_or(0.0),
            req.state.unwrap_or(AgentState::Free),
            req.reputation,
        )
        .await;

    Ok(Json(json!({ "status": "ok" })))
}

async fn upload_code(
    State(state): State<CoordinatorState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, CoordinatorError> {
    let mut bundle_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoordinatorError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("code") {
            filename = field.file_name().map(|s| s.to_string());
            bundle_bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| CoordinatorError::BadRequest(format!("failed to read upload: {e}")))?
                    .to_vec(),
            );
        }
    }

    let filename = filename
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CoordinatorError::BadRequest("No code file provided".to_string()))?;
    let bundle_bytes =
        bundle_bytes.ok_or_else(|| CoordinatorError::BadRequest("No code file provided".to_string()))?;
    if bundle_bytes.is_empty() {
        return Err(CoordinatorError::BadRequest("Empty filename".to_string()));
    }

    let built = bundle::upload_and_build(bundle_bytes, &filename, &state.config).await?;

    let (deployment_id, agent_endpoint, mapped_ports) = dispatch::dispatch(
        &state.http_client,
        &state.registry,
        &state.placements,
        &built.image_tag,
    )
    .await?;

    Ok(Json(json!({
        "status": "deployed",
        "agent": agent_endpoint,
        "image": built.image_tag,
        "deployment_id": deployment_id,
        "mapped_ports": mapped_ports,
        "logs": "",
    })))
}

#[derive(Deserialize)]
struct DeploymentIdQuery {
    deployment_id: Option<String>,
}

async fn deployment_logs(
    State(state): State<CoordinatorState>,
    Query(query): Query<DeploymentIdQuery>,
) -> Result<axum::response::Response, CoordinatorError> {
    let deployment_id = query
        .deployment_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CoordinatorError::BadRequest("missing deployment_id".to_string()))?;

    let placement = state
        .placements
        .get(&deployment_id)
        .await
        .ok_or_else(|| CoordinatorError::UnknownDeployment(deployment_id.clone()))?;

    let url = format!(
        "http://{}/deployment_logs?deployment_id={deployment_id}",
        placement.agent_endpoint
    );
    relay(&state.http_client, state.http_client.get(&url)).await
}

#[derive(Deserialize)]
struct CancelRequest {
    deployment_id: Option<String>,
}

async fn cancel_deployment(
    State(state): State<CoordinatorState>,
    Json(req): Json<CancelRequest>,
) -> Result<axum::response::Response, CoordinatorError> {
    let deployment_id = req
        .deployment_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CoordinatorError::BadRequest("missing deployment_id".to_string()))?;

    let placement = state
        .placements
        .get(&deployment_id)
        .await
        .ok_or_else(|| CoordinatorError::UnknownDeployment(deployment_id.clone()))?;

    let url = format!("http://{}/cancel_deployment", placement.agent_endpoint);
    let request = state
        .http_client
        .post(&url)
        .json(&json!({ "deployment_id": deployment_id }));
    let response = relay(&state.http_client, request).await?;

    if response.status().is_success() {
        state
            .placements
            .set_status(&deployment_id, DeploymentStatus::Cancelled)
            .await;
    }

    Ok(response)
}

async fn relay(
    _client: &reqwest::Client,
    request: reqwest::RequestBuilder,
) -> Result<axum::response::Response, CoordinatorError> {
    let response = request
        .timeout(PROXY_TIMEOUT)
        .send()
        .await
        .map_err(|e| CoordinatorError::RuntimeError(e.to_string()))?;

    let status = axum::http::StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    let body = response
        .text()
        .await
        .map_err(|e| CoordinatorError::RuntimeError(e.to_string()))?;

    Ok((status, [("content-type", "application/json")], body).into_response())
}

async fn agents(State(state): State<CoordinatorState>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.registry.list_agents().await).unwrap_or_default())
}

async fn deployments(State(state): State<CoordinatorState>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.placements.list().await).unwrap_or_default())
}

use axum::response::IntoResponse as _;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> CoordinatorState {
        CoordinatorState {
            registry: Arc::new(AgentRegistry::new(Duration::from_secs(10))),
            placements: Arc::new(PlacementMap::new()),
            config: Arc::new(CoordinatorConfig {
                port: 5000,
                heartbeat_timeout: Duration::from_secs(10),
                docker_username: None,
                docker_password: None,
                hub_push: false,
            }),
            http_client: reqwest::Client::new(),
        }
    }

    async fn send(app: Router, request: Request<Body>) -> axum::response::Response {
        app.oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = router(test_state());
        let resp = send(app, Request::builder().uri("/healthz").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn heartbeat_rejects_missing_agent_id() {
        let app = router(test_state());
        let resp = send(
            app,
            Request::builder()
                .method("POST")
                .uri("/heartbeat")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn heartbeat_accepts_valid_payload_and_registers_agent() {
        let state = test_state();
        let registry = state.registry.clone();
        let app = router(state);
        let body = json!({
            "agent_id": "a1",
            "ip": "10.0.0.4:5001",
            "cpu": 5.0,
            "memory": 10.0,
            "state": "free",
        })
        .to_string();
        let resp = send(
            app,
            Request::builder()
                .method("POST")
                .uri("/heartbeat")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(registry.list_agents().await.contains_key("a1"));
    }

    #[tokio::test]
    async fn deployment_logs_missing_id_is_bad_request() {
        let app = router(test_state());
        let resp = send(
            app,
            Request::builder()
                .uri("/deployment_logs")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deployment_logs_unknown_id_is_not_found() {
        let app = router(test_state());
        let resp = send(
            app,
            Request::builder()
                .uri("/deployment_logs?deployment_id=missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_deployment_unknown_id_is_not_found() {
        let app = router(test_state());
        let resp = send(
            app,
            Request::builder()
                .method("POST")
                .uri("/cancel_deployment")
                .header("content-type", "application/json")
                .body(Body::from(json!({"deployment_id": "missing"}).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn agents_and_deployments_start_empty() {
        let app = router(test_state());
        let resp = send(app.clone(), Request::builder().uri("/agents").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = send(app, Request::builder().uri("/deployments").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
