//! API error types and response handling.
//!
//! Every handler failure becomes an [`ApiError`], which renders as a JSON
//! [`ErrorResponse`] with a matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use frame_setup_core::{DispatchError, ExecuteError, SetupError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - malformed input.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Status string the device now reports, if any.
        status: Option<String>,
    },

    /// 404 Not Found - no such resource.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - the setup state does not allow the operation.
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Status string the device now reports.
        status: Option<String>,
    },

    /// 500 Internal Server Error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 503 Service Unavailable - network or provisioning task unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Status string the device now reports.
        status: Option<String>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "MISSING_CREDENTIALS",
    "message": "Wi-Fi credentials have not been provided",
    "status": "Error: WiFi credentials missing"
}))]
pub struct ErrorResponse {
    /// Machine-readable error code.
    #[schema(example = "MISSING_CREDENTIALS")]
    pub error: String,

    /// Human-readable error message.
    pub message: String,

    /// Status string published to BLE peers, when the failure changed it.
    #[schema(nullable)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let body = match self {
            Self::BadRequest {
                error_code,
                message,
                status,
            }
            | Self::Conflict {
                error_code,
                message,
                status,
            }
            | Self::ServiceUnavailable {
                error_code,
                message,
                status,
            } => ErrorResponse {
                error: error_code,
                message,
                status,
            },
            Self::NotFound {
                error_code,
                message,
            } => ErrorResponse {
                error: error_code,
                message,
                status: None,
            },
            Self::InternalError {
                error_code,
                message,
            } => {
                tracing::error!(error_code = %error_code, message = %message, "Internal server error");
                ErrorResponse {
                    error: error_code,
                    message,
                    status: None,
                }
            }
        };

        (status_code, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::Conflict { message, .. } => write!(f, "Conflict: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl From<SetupError> for ApiError {
    fn from(err: SetupError) -> Self {
        let error_code = err.error_code().to_string();
        let message = err.to_string();
        let status = Some(err.status_message().to_string());

        match err {
            SetupError::InvalidPayload { .. } | SetupError::UnknownCommand(_) => Self::BadRequest {
                error_code,
                message,
                status,
            },
            SetupError::MissingCredentials
            | SetupError::MissingConfig
            | SetupError::AlreadyComplete => Self::Conflict {
                error_code,
                message,
                status,
            },
            SetupError::ConnectionFailed(_) | SetupError::ConnectivityCheckFailed => {
                Self::ServiceUnavailable {
                    error_code,
                    message,
                    status,
                }
            }
            SetupError::PersistFailed(_) | SetupError::StorageLoadFailed(_) => {
                Self::InternalError {
                    error_code,
                    message,
                }
            }
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnknownChannel(_) => Self::NotFound {
                error_code: "UNKNOWN_CHANNEL".to_string(),
                message: err.to_string(),
            },
            DispatchError::NotWritable(_) | DispatchError::NotReadable(_) => Self::BadRequest {
                error_code: "CHANNEL_DIRECTION".to_string(),
                message: err.to_string(),
                status: None,
            },
            DispatchError::Stopped(_) => Self::ServiceUnavailable {
                error_code: "SERVICE_STOPPED".to_string(),
                message: err.to_string(),
                status: None,
            },
        }
    }
}

impl From<ExecuteError> for ApiError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::Setup(e) => e.into(),
            ExecuteError::Stopped(e) => DispatchError::from(e).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_setup_core::PayloadKind;

    #[test]
    fn test_setup_errors_map_to_status_codes() {
        let cases = [
            (
                SetupError::invalid_payload(PayloadKind::Credentials, "eof"),
                StatusCode::BAD_REQUEST,
            ),
            (SetupError::MissingConfig, StatusCode::CONFLICT),
            (SetupError::ConnectivityCheckFailed, StatusCode::SERVICE_UNAVAILABLE),
            (
                SetupError::PersistFailed("disk full".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_setup_error_carries_status() {
        let ApiError::Conflict { status, .. } = ApiError::from(SetupError::MissingCredentials)
        else {
            panic!("expected conflict");
        };
        assert!(status.unwrap().starts_with("Error:"));
    }

    #[test]
    fn test_unknown_channel_is_not_found() {
        let err = ApiError::from(DispatchError::UnknownChannel("wifi".into()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.to_string().contains("wifi"));
    }

    #[test]
    fn test_error_response_omits_missing_status() {
        let response = ErrorResponse {
            error: "test_error".to_string(),
            message: "Test message".to_string(),
            status: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test_error"));
        assert!(!json.contains("status"));
    }
}
