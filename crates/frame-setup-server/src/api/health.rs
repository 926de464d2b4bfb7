//! Health check API endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "setup_complete": false
}))]
pub struct HealthResponse {
    /// `ok` while the provisioning task runs, `degraded` otherwise.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Whether setup has completed since the last reset.
    #[schema(example = false)]
    pub setup_complete: bool,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Reports whether the provisioning task is running and \
        whether setup has completed.",
    responses(
        (status = 200, description = "Service status", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let setup = state.setup();
    let status = if setup.is_running() { "ok" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        setup_complete: setup.snapshot().setup_complete,
    })
}
