use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::error::WorkerError;
use crate::worker::WorkerState;

pub fn router(state: WorkerState) -> Router {
    Router::new()
        .route("/start_deployment", post(start_deployment))
        .route("/deployment_logs", get(deployment_logs))
        .route("/cancel_deployment", post(cancel_deployment))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct StartRequest {
    image: Option<String>,
    container_name: Option<String>,
}

async fn start_deployment(
    State(state): State<WorkerState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<serde_json::Value>, WorkerError> {
    let image = req
        .image
        .filter(|s| !s.is_empty())
        .ok_or_else(|| WorkerError::BadRequest("No image provided".to_string()))?;
    let container_name = req
        .container_name
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("{image}_container"));

    let (deployment_id, mapped_ports) = state.start_deployment(image, container_name).await?;

    Ok(Json(json!({
        "status": "started",
        "deployment_id": deployment_id,
        "mapped_ports": mapped_ports,
    })))
}

#[derive(Deserialize)]
struct DeploymentIdQuery {
    deployment_id: Option<String>,
}

async fn deployment_logs(
    State(state): State<WorkerState>,
    axum::extract::Query(query): axum::extract::Query<DeploymentIdQuery>,
) -> Result<Json<serde_json::Value>, WorkerError> {
    let deployment_id = query
        .deployment_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| WorkerError::BadRequest("missing deployment_id".to_string()))?;

    let (status, logs, mapped_ports) = state.logs(&deployment_id).await?;

    Ok(Json(json!({
        "status": status,
        "logs": logs,
        "mapped_ports": mapped_ports,
    })))
}

#[derive(Deserialize)]
struct CancelRequest {
    deployment_id: Option<String>,
}

async fn cancel_deployment(
    State(state): State<WorkerState>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<serde_json::Value>, WorkerError> {
    let deployment_id = req
        .deployment_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| WorkerError::BadRequest("missing deployment_id".to_string()))?;

    let status = state.cancel(&deployment_id).await?;

    Ok(Json(json!({
        "status": status,
        "deployment_id": deployment_id,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bollard::Docker;
    use tower::ServiceExt;

    fn test_state() -> WorkerState {
        let config = crate::config::WorkerConfig {
            agent_ip: "127.0.0.1:5001".to_string(),
            agent_port: 5001,
            scheduler_url: "http://localhost:5000".to_string(),
            heartbeat_interval: std::time::Duration::from_secs(2),
        };
        let docker = Docker::connect_with_local_defaults().expect("docker handle construction");
        WorkerState::new(config, docker)
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
    async fn deployment_logs_unknown_id_is_bad_request() {
        let app = router(test_state());
        let resp = send(
            app,
            Request::builder()
                .uri("/deployment_logs?deployment_id=missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancel_deployment_unknown_id_is_bad_request() {
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
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_deployment_missing_image_is_bad_request() {
        let app = router(test_state());
        let resp = send(
            app,
            Request::builder()
                .method("POST")
                .uri("/start_deployment")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
