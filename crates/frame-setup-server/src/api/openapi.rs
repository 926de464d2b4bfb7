//! OpenAPI specification for the local status API.

use axum::Json;
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::setup::SetupStatusResponse;
use frame_setup_core::SetupPhase;

/// Serve the OpenAPI specification at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

/// The full document, including feature-gated routes.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    #[allow(unused_mut)]
    let mut doc = ApiDoc::openapi();
    #[cfg(feature = "mock-bluetooth")]
    doc.merge(MockChannelsDoc::openapi());
    doc
}

/// The document as pretty-printed JSON. Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    openapi().to_pretty_json()
}

/// Main OpenAPI document for frame-setup.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "frame-setup API",
        version = "0.1.0",
        description = r#"
# frame-setup API

Loopback API of the Domino photo frame provisioning service.

Setup itself happens over BLE: a phone writes Wi-Fi credentials and a frame
configuration, then sends `complete_setup`. This API lets the on-device
display follow along without a BLE connection of its own.

Status strings are identical to what BLE peers receive. Failures start with
`Error:`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local frame-setup server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "setup", description = "Provisioning progress")
    ),
    paths(
        super::health::health_check,
        super::setup::get_setup_status,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            SetupStatusResponse,
            SetupPhase,
        )
    )
)]
pub struct ApiDoc;

/// Bench-testing routes.
#[cfg(feature = "mock-bluetooth")]
#[derive(OpenApi)]
#[openapi(paths(super::channels::write_channel))]
struct MockChannelsDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = openapi();
        assert_eq!(spec.info.title, "frame-setup API");
        assert!(spec.paths.paths.contains_key("/api/setup"));
        assert!(spec.paths.paths.contains_key("/health"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"frame-setup API\""));
    }
}
