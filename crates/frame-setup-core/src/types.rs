//! Shared types for the provisioning protocol.
//!
//! Payload types mirror the JSON the companion app writes to the GATT
//! characteristics. Snapshot types are exposed over the local status API and
//! carry OpenAPI schemas.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::error::SetupError;

/// Wi-Fi credentials written to the credentials channel.
///
/// `password` may be empty or omitted for open networks.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Network name.
    pub ssid: String,

    /// Network passphrase.
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    /// Parse and validate a raw channel payload.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidPayload`] if the bytes are not a JSON
    /// object with a non-empty `ssid`.
    pub fn from_payload(bytes: &[u8]) -> Result<Self, SetupError> {
        let creds: Self = decode_object(bytes, PayloadKind::Credentials)?;
        if creds.ssid.is_empty() {
            return Err(SetupError::invalid_payload(
                PayloadKind::Credentials,
                "ssid must not be empty",
            ));
        }
        Ok(creds)
    }

    /// Whether this is an open network.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

// Keeps passphrases out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Device configuration written to the device-config channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// User-facing frame name.
    pub name: String,

    /// Identifier the app believes the frame has. Informational only; the
    /// persisted identity is never replaced by it.
    pub frame_id: String,

    /// Backend API endpoint.
    pub api_endpoint: String,

    /// Storage bucket holding the frame's images.
    pub s3_bucket: String,
}

impl DeviceConfig {
    /// Parse a raw channel payload.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidPayload`] if the bytes are not a JSON
    /// object carrying all four string fields.
    pub fn from_payload(bytes: &[u8]) -> Result<Self, SetupError> {
        decode_object(bytes, PayloadKind::DeviceConfig)
    }
}

// Derived struct deserializers also accept JSON arrays, so the payload is
// required to be an object before the fields are mapped.
fn decode_object<T: DeserializeOwned>(bytes: &[u8], kind: PayloadKind) -> Result<T, SetupError> {
    let map: Map<String, Value> =
        serde_json::from_slice(bytes).map_err(|e| SetupError::invalid_payload(kind, e))?;
    serde_json::from_value(Value::Object(map)).map_err(|e| SetupError::invalid_payload(kind, e))
}

/// Which structured payload failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Wi-Fi credentials.
    Credentials,
    /// Device configuration.
    DeviceConfig,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credentials => f.write_str("credentials"),
            Self::DeviceConfig => f.write_str("device config"),
        }
    }
}

/// Commands accepted on the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Join the network and commit the configuration.
    CompleteSetup,
    /// Drop all in-memory setup data.
    Reset,
    /// Probe internet reachability.
    TestWifi,
}

impl Command {
    /// Wire representation of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CompleteSetup => "complete_setup",
            Self::Reset => "reset",
            Self::TestWifi => "test_wifi",
        }
    }
}

impl FromStr for Command {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete_setup" => Ok(Self::CompleteSetup),
            "reset" => Ok(Self::Reset),
            "test_wifi" => Ok(Self::TestWifi),
            other => Err(SetupError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SetupPhase {
    /// Nothing received yet.
    Idle,
    /// Credentials held, device config missing.
    CredentialsReceived,
    /// Device config held, credentials missing.
    ConfigReceived,
    /// Both held; `complete_setup` may run.
    ReadyToComplete,
    /// Join in progress.
    Connecting,
    /// Join verified.
    Connected,
    /// Committing configuration to disk.
    Persisting,
    /// Setup finished. Terminal until reset.
    Complete,
}

impl SetupPhase {
    /// Phase implied by which inputs are held.
    #[must_use]
    pub const fn from_inputs(has_credentials: bool, has_config: bool) -> Self {
        match (has_credentials, has_config) {
            (false, false) => Self::Idle,
            (true, false) => Self::CredentialsReceived,
            (false, true) => Self::ConfigReceived,
            (true, true) => Self::ReadyToComplete,
        }
    }

    /// Whether a join or commit is running.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Persisting)
    }
}

/// Point-in-time view of the provisioning state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "WiFi credentials received",
    "phase": "credentials_received",
    "setup_complete": false
}))]
pub struct SetupSnapshot {
    /// Current status string. Failures start with `Error:`.
    #[schema(example = "WiFi credentials received")]
    pub status: String,

    /// Current phase.
    pub phase: SetupPhase,

    /// Whether setup has completed since the last reset.
    pub setup_complete: bool,
}

/// Emitted once setup completes, after the restart delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SetupCompleted {
    /// Persisted device identity.
    #[schema(example = "aB3dE7x")]
    pub frame_id: String,

    /// Frame name committed with the configuration.
    #[schema(example = "Kitchen")]
    pub frame_name: String,

    /// When the configuration was committed.
    pub completed_at: DateTime<Utc>,
}
