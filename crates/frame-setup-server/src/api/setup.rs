//! Setup status endpoint for the on-device front end.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use frame_setup_core::{SetupPhase, SetupSnapshot};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Current setup state plus identity.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "Connecting to WiFi...",
    "phase": "connecting",
    "setup_complete": false,
    "in_progress": true,
    "frame_id": "aB3dE7x",
    "advertised_name": "DominoFrame-aB3dE7x"
}))]
pub struct SetupStatusResponse {
    /// Status string as seen by BLE peers.
    pub status: String,

    /// Current phase.
    pub phase: SetupPhase,

    /// Whether setup has completed since the last reset.
    pub setup_complete: bool,

    /// Whether a network join or commit is running.
    pub in_progress: bool,

    /// Persisted device identity.
    #[schema(example = "aB3dE7x")]
    pub frame_id: String,

    /// BLE local name.
    #[schema(example = "DominoFrame-aB3dE7x")]
    pub advertised_name: String,
}

impl SetupStatusResponse {
    /// Combine a snapshot with the identity.
    #[must_use]
    pub fn new(snapshot: SetupSnapshot, state: &SharedState) -> Self {
        Self {
            status: snapshot.status,
            phase: snapshot.phase,
            setup_complete: snapshot.setup_complete,
            in_progress: snapshot.phase.is_in_flight(),
            frame_id: state.frame_id().to_string(),
            advertised_name: state.advertised_name().to_string(),
        }
    }
}

/// Creates the setup router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_setup_status))
}

/// Current setup status.
#[utoipa::path(
    get,
    path = "/api/setup",
    tag = "setup",
    operation_id = "getSetupStatus",
    summary = "Get setup status",
    description = "Returns the latest status string and phase. Never blocks, \
        even while a network join is in progress.",
    responses(
        (status = 200, description = "Current setup state", body = SetupStatusResponse)
    )
)]
pub async fn get_setup_status(State(state): State<SharedState>) -> Json<SetupStatusResponse> {
    let snapshot = state.setup().snapshot();
    Json(SetupStatusResponse::new(snapshot, &state))
}
