//! Channel write injection for bench testing without a radio.
//!
//! Only compiled with the `mock-bluetooth` feature. A POST body is delivered
//! to the dispatcher exactly as a BLE write would be, and the response waits
//! for the write to be applied.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use frame_setup_core::{Channel, ChannelDispatcher};
use tracing::info;

use super::error::ApiResult;
use super::setup::SetupStatusResponse;
use crate::state::SharedState;

/// Creates the channels router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/{channel}", post(write_channel))
}

/// Inject a channel write.
#[utoipa::path(
    post,
    path = "/api/channels/{channel}",
    tag = "setup",
    operation_id = "writeChannel",
    summary = "Inject a channel write",
    description = "Delivers the raw request body to a writable channel \
        (`credentials`, `config` or `command`) and returns the resulting state.",
    params(
        ("channel" = String, Path, description = "Channel name", example = "command")
    ),
    request_body(content = String, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Write applied", body = SetupStatusResponse),
        (status = 400, description = "Malformed payload or read-only channel", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown channel", body = super::error::ErrorResponse),
        (status = 409, description = "Setup state does not allow the command", body = super::error::ErrorResponse),
        (status = 503, description = "Network join or probe failed", body = super::error::ErrorResponse)
    )
)]
pub async fn write_channel(
    State(state): State<SharedState>,
    Path(channel): Path<String>,
    body: Bytes,
) -> ApiResult<Json<SetupStatusResponse>> {
    let channel: Channel = channel.parse()?;
    let event = ChannelDispatcher::event_for(channel, &body)?;
    info!(%channel, len = body.len(), "Injected channel write");

    state.setup().execute(event).await?;
    Ok(Json(SetupStatusResponse::new(state.setup().snapshot(), &state)))
}
