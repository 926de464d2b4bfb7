//! Unified error types for the provisioning core.
//!
//! [`SetupError`] covers every failure the state machine can report to a
//! client. Each module also has its own error type ([`StoreError`],
//! [`JoinError`], [`ConfigError`]) for internal use; they convert into
//! `SetupError` at the state-machine boundary.
//!
//! # Design Principles
//!
//! - **Specific variants**: each variant captures exactly one failure mode
//! - **Two renderings**: `Display` is the detailed log line,
//!   [`SetupError::status_message`] is the short client-visible status
//! - **Status contract**: every status message starts with `Error:`
//!
//! # Example
//!
//! ```rust
//! use frame_setup_core::error::SetupError;
//!
//! let err = SetupError::MissingCredentials;
//! assert!(err.status_message().starts_with("Error:"));
//! assert_eq!(err.error_code(), "MISSING_CREDENTIALS");
//! ```

use std::fmt::Display;

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::network::JoinError;
pub use crate::storage::StoreError;
use crate::types::PayloadKind;

/// Prefix every failure status carries.
pub const ERROR_STATUS_PREFIX: &str = "Error:";

/// The unified error type for provisioning operations.
///
/// None of these are fatal: the service keeps running and accepts further
/// commands after any of them.
#[derive(Debug, Error)]
pub enum SetupError {
    // =========================================================================
    // INPUT ERRORS
    // =========================================================================
    /// A structured channel write could not be parsed.
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Which payload was being parsed.
        kind: PayloadKind,
        /// Parser or validation message.
        reason: String,
    },

    /// The command channel received an unrecognized string.
    #[error("Unknown command: '{0}'")]
    UnknownCommand(String),

    // =========================================================================
    // PRECONDITION ERRORS
    // =========================================================================
    /// A command needs Wi-Fi credentials that have not been written.
    #[error("Wi-Fi credentials have not been provided")]
    MissingCredentials,

    /// `complete_setup` needs a device config that has not been written.
    #[error("Device configuration has not been provided")]
    MissingConfig,

    /// `complete_setup` was issued after setup already completed.
    #[error("Setup is already complete; reset before running it again")]
    AlreadyComplete,

    // =========================================================================
    // NETWORK ERRORS
    // =========================================================================
    /// Joining or verifying the target network failed.
    #[error("Wi-Fi connection failed: {0}")]
    ConnectionFailed(String),

    /// The reachability probe failed.
    #[error("Connectivity check failed")]
    ConnectivityCheckFailed,

    // =========================================================================
    // PERSISTENCE ERRORS
    // =========================================================================
    /// Writing the persisted document failed.
    #[error("Failed to persist configuration: {0}")]
    PersistFailed(String),

    /// The persisted document could not be loaded at startup.
    #[error("Failed to load persisted state: {0}")]
    StorageLoadFailed(String),
}

/// A specialized [`Result`] type for provisioning operations.
pub type Result<T> = std::result::Result<T, SetupError>;

impl SetupError {
    /// Build an [`SetupError::InvalidPayload`] from any displayable reason.
    pub fn invalid_payload(kind: PayloadKind, reason: impl Display) -> Self {
        Self::InvalidPayload {
            kind,
            reason: reason.to_string(),
        }
    }

    /// Client-visible status string. Always starts with [`ERROR_STATUS_PREFIX`].
    #[must_use]
    pub const fn status_message(&self) -> &'static str {
        match self {
            Self::InvalidPayload {
                kind: PayloadKind::Credentials,
                ..
            } => "Error: Invalid WiFi data",
            Self::InvalidPayload {
                kind: PayloadKind::DeviceConfig,
                ..
            } => "Error: Invalid config data",
            Self::UnknownCommand(_) => "Error: Unknown command",
            Self::MissingCredentials => "Error: WiFi credentials missing",
            Self::MissingConfig => "Error: Frame configuration missing",
            Self::AlreadyComplete => "Error: Setup already complete, reset first",
            Self::ConnectionFailed(_) => "Error: WiFi connection failed",
            Self::ConnectivityCheckFailed => "Error: WiFi test failed, no internet",
            Self::PersistFailed(_) => "Error: Failed to save config",
            Self::StorageLoadFailed(_) => "Error: Stored configuration unreadable",
        }
    }

    /// Machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPayload { .. } => "INVALID_PAYLOAD",
            Self::UnknownCommand(_) => "UNKNOWN_COMMAND",
            Self::MissingCredentials => "MISSING_CREDENTIALS",
            Self::MissingConfig => "MISSING_CONFIG",
            Self::AlreadyComplete => "ALREADY_COMPLETE",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::ConnectivityCheckFailed => "CONNECTIVITY_CHECK_FAILED",
            Self::PersistFailed(_) => "PERSIST_FAILED",
            Self::StorageLoadFailed(_) => "STORAGE_LOAD_FAILED",
        }
    }

    /// Returns `true` if resubmitting input (rather than retrying a command)
    /// clears this error.
    #[inline]
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload { .. }
                | Self::UnknownCommand(_)
                | Self::MissingCredentials
                | Self::MissingConfig
        )
    }

    /// Returns `true` if simply retrying the same command may succeed.
    #[inline]
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::ConnectivityCheckFailed | Self::PersistFailed(_)
        )
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<StoreError> for SetupError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Read { .. } | StoreError::Parse { .. } | StoreError::NotAnObject { .. } => {
                Self::StorageLoadFailed(err.to_string())
            }
            StoreError::Write { .. } | StoreError::Serialize(_) => {
                Self::PersistFailed(err.to_string())
            }
        }
    }
}

impl From<JoinError> for SetupError {
    fn from(err: JoinError) -> Self {
        Self::ConnectionFailed(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn all_variants() -> Vec<SetupError> {
        vec![
            SetupError::invalid_payload(PayloadKind::Credentials, "eof"),
            SetupError::invalid_payload(PayloadKind::DeviceConfig, "eof"),
            SetupError::UnknownCommand("reboot".into()),
            SetupError::MissingCredentials,
            SetupError::MissingConfig,
            SetupError::AlreadyComplete,
            SetupError::ConnectionFailed("timeout".into()),
            SetupError::ConnectivityCheckFailed,
            SetupError::PersistFailed("disk full".into()),
            SetupError::StorageLoadFailed("bad json".into()),
        ]
    }

    #[test]
    fn test_every_status_starts_with_error_prefix() {
        for err in all_variants() {
            assert!(
                err.status_message().starts_with(ERROR_STATUS_PREFIX),
                "{err:?} -> {}",
                err.status_message()
            );
        }
    }

    #[test]
    fn test_missing_credentials_status_mentions_credentials() {
        let msg = SetupError::MissingCredentials.status_message();
        assert!(msg.contains("credentials missing"));
    }

    #[test]
    fn test_payload_status_depends_on_kind() {
        assert_eq!(
            SetupError::invalid_payload(PayloadKind::Credentials, "x").status_message(),
            "Error: Invalid WiFi data"
        );
        assert_eq!(
            SetupError::invalid_payload(PayloadKind::DeviceConfig, "x").status_message(),
            "Error: Invalid config data"
        );
    }

    #[test]
    fn test_classification() {
        assert!(SetupError::MissingConfig.is_input_error());
        assert!(SetupError::UnknownCommand("x".into()).is_input_error());
        assert!(!SetupError::ConnectionFailed("x".into()).is_input_error());

        assert!(SetupError::ConnectionFailed("x".into()).is_retryable());
        assert!(SetupError::PersistFailed("x".into()).is_retryable());
        assert!(!SetupError::MissingCredentials.is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SetupError::MissingConfig.error_code(), "MISSING_CONFIG");
        assert_eq!(
            SetupError::ConnectionFailed(String::new()).error_code(),
            "CONNECTION_FAILED"
        );
    }

    #[test]
    fn test_from_store_error() {
        let write = StoreError::Write {
            path: PathBuf::from("/ro/config.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        };
        assert!(matches!(SetupError::from(write), SetupError::PersistFailed(_)));

        let parse = StoreError::NotAnObject {
            path: PathBuf::from("config.json"),
        };
        assert!(matches!(SetupError::from(parse), SetupError::StorageLoadFailed(_)));

        let read = StoreError::Read {
            path: PathBuf::from("config.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(matches!(SetupError::from(read), SetupError::StorageLoadFailed(_)));
    }

    #[test]
    fn test_from_join_error() {
        let err = SetupError::from(JoinError::NotAssociated {
            ssid: "Home".into(),
        });
        assert!(matches!(err, SetupError::ConnectionFailed(ref m) if m.contains("Home")));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SetupError>();
        assert_sync::<SetupError>();
    }
}
