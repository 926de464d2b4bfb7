//! HTTP API routes and handlers.
//!
//! - `health` - Service health check
//! - `setup` - Provisioning progress for the on-device display
//! - `channels` - Channel write injection (`mock-bluetooth` only)
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

#[cfg(feature = "mock-bluetooth")]
pub mod channels;
pub mod error;
pub mod health;
pub mod openapi;
pub mod setup;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router.
///
/// # Route Structure
///
/// ```text
/// /health                  - Health check
/// /api
/// ├── /setup               - Current status, phase and identity
/// ├── /channels/{channel}  - POST a channel write (mock-bluetooth)
/// └── /openapi.json        - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/openapi.json", get(openapi::get_openapi_spec))
        .nest("/setup", setup::router());

    #[cfg(feature = "mock-bluetooth")]
    let api = api.nest("/channels", channels::router());

    Router::new()
        .nest("/health", health::router())
        .nest("/api", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_methods([Method::GET, Method::POST])
                        .allow_origin(Any),
                ),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum_test::TestServer;
    use frame_setup_core::{
        spawn, ConfigStore, Identity, JoinError, NetworkJoiner, ProvisioningStateMachine,
        ServiceConfig, StatusFeed, INITIAL_STATUS,
    };
    use serde_json::Value;
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::state::AppState;

    struct LoopbackNetwork;

    impl NetworkJoiner for LoopbackNetwork {
        async fn join(&self, _ssid: &str, _passphrase: &str) -> Result<(), JoinError> {
            Ok(())
        }

        async fn test_connectivity(&self) -> bool {
            true
        }
    }

    fn server() -> (TempDir, TestServer, String) {
        let dir = tempdir().unwrap();
        let store = Arc::new(ConfigStore::new(dir.path().join("config.json")));
        let identity = Identity::load_or_generate(&store).unwrap();
        let machine = ProvisioningStateMachine::new(
            LoopbackNetwork,
            store,
            &identity,
            Arc::new(StatusFeed::new()),
        )
        .with_restart_delay(Duration::ZERO);
        let (handle, _task) = spawn(machine);
        let state = AppState::new(handle, &identity, &ServiceConfig::default().bluetooth.name_prefix).shared();
        let server = TestServer::new(create_router(state)).unwrap();
        (dir, server, identity.frame_id().to_string())
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, server, _) = server();
        let response = server.get("/health").await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["setup_complete"], false);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_setup_status_reports_identity() {
        let (_dir, server, frame_id) = server();
        let response = server.get("/api/setup").await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["status"], INITIAL_STATUS);
        assert_eq!(body["phase"], "idle");
        assert_eq!(body["frame_id"], frame_id.as_str());
        assert_eq!(body["advertised_name"], format!("DominoFrame-{frame_id}"));
    }

    #[tokio::test]
    async fn test_openapi_served() {
        let (_dir, server, _) = server();
        let response = server.get("/api/openapi.json").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["info"]["title"], "frame-setup API");
    }

    #[cfg(not(feature = "mock-bluetooth"))]
    #[tokio::test]
    async fn test_channel_injection_disabled() {
        let (_dir, server, _) = server();
        server
            .post("/api/channels/command")
            .bytes("reset".into())
            .expect_failure()
            .await
            .assert_status_not_found();
    }

    #[cfg(feature = "mock-bluetooth")]
    mod injection {
        use axum::http::StatusCode;

        use super::*;

        #[tokio::test]
        async fn test_full_setup_over_injected_writes() {
            let (_dir, server, _) = server();

            server
                .post("/api/channels/credentials")
                .bytes(r#"{"ssid":"Bench","password":"benchpass"}"#.into())
                .await
                .assert_status_ok();
            server
                .post("/api/channels/config")
                .bytes(
                    r#"{"name":"Bench","frame_id":"x","api_endpoint":"http://localhost","s3_bucket":"b"}"#
                        .into(),
                )
                .await
                .assert_status_ok();
            let response = server.post("/api/channels/command").bytes("complete_setup".into()).await;
            response.assert_status_ok();

            let body: Value = response.json();
            assert_eq!(body["phase"], "complete");
            assert_eq!(body["setup_complete"], true);
        }

        #[tokio::test]
        async fn test_precondition_failure_is_conflict() {
            let (_dir, server, _) = server();
            let response = server
                .post("/api/channels/command")
                .bytes("complete_setup".into())
                .expect_failure()
                .await;
            response.assert_status(StatusCode::CONFLICT);

            let body: Value = response.json();
            assert_eq!(body["error"], "MISSING_CREDENTIALS");
            assert!(body["status"].as_str().unwrap().starts_with("Error:"));
        }

        #[tokio::test]
        async fn test_status_channel_is_read_only() {
            let (_dir, server, _) = server();
            server
                .post("/api/channels/status")
                .bytes("x".into())
                .expect_failure()
                .await
                .assert_status_bad_request();
            server
                .post("/api/channels/wifi")
                .bytes("x".into())
                .expect_failure()
                .await
                .assert_status_not_found();
        }
    }
}
