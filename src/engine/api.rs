//! ctsync API Module
//! Local HTTP adapter for enable/disable, status and manual update requests

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::engine::service::{Service, ServiceStatus};

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<Service>,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/enable", post(enable))
        .route("/api/disable", post(disable))
        .route("/api/update", post(run_update))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_status(State(state): State<ApiState>) -> Json<ServiceStatus> {
    Json(state.service.status())
}

async fn enable(State(state): State<ApiState>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .service
        .enable()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))?;
    Ok(Json(json!({ "enabled": state.service.is_enabled() })))
}

async fn disable(State(state): State<ApiState>) -> Json<Value> {
    state.service.disable();
    Json(json!({ "enabled": state.service.is_enabled() }))
}

async fn run_update(State(state): State<ApiState>) -> Json<Value> {
    let outcomes = state.service.job().run().await;
    let results: serde_json::Map<String, Value> = outcomes
        .into_iter()
        .map(|(version_id, outcome)| (version_id, json!(outcome)))
        .collect();
    Json(json!({ "results": results }))
}
