//! Service configuration.
//!
//! Settings are layered, lowest priority first:
//! - built-in defaults
//! - an optional TOML file (`/etc/frame-setup/config.toml` on the device)
//! - `FRAME_SETUP__<SECTION>__<KEY>` environment variables
//!
//! ```toml
//! [storage]
//! path = "./config.json"
//!
//! [bluetooth]
//! name_prefix = "DominoFrame-"
//!
//! [network]
//! settle_secs = 3
//! probe_host = "1.1.1.1"
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::DEFAULT_STORE_PATH;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "FRAME_SETUP";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A single field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("Configuration has {} invalid fields", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Persisted-state location.
    pub storage: StorageSettings,
    /// BLE adapter and advertisement.
    pub bluetooth: BluetoothSettings,
    /// Network join and probe timings.
    pub network: NetworkSettings,
    /// Post-completion behaviour.
    pub completion: CompletionSettings,
    /// Local status API.
    pub http: HttpSettings,
}

/// Persisted-state location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the JSON document.
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

/// BLE adapter and advertisement settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothSettings {
    /// Adapter name (e.g. `hci0`). The default adapter when unset.
    pub adapter: Option<String>,
    /// Prefix of the advertised local name; the frame id is appended.
    pub name_prefix: String,
}

impl Default for BluetoothSettings {
    fn default() -> Self {
        Self {
            adapter: None,
            name_prefix: "DominoFrame-".to_string(),
        }
    }
}

/// Network join and connectivity probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Wait between issuing a join and verifying association.
    pub settle_secs: u64,
    /// Upper bound for any single `nmcli` invocation.
    pub command_timeout_secs: u64,
    /// Address pinged by `test_wifi`.
    pub probe_host: String,
    /// Reply timeout passed to `ping -W`.
    pub probe_timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            settle_secs: 3,
            command_timeout_secs: 30,
            probe_host: "1.1.1.1".to_string(),
            probe_timeout_secs: 3,
        }
    }
}

impl NetworkSettings {
    /// Settle interval as a [`Duration`].
    #[must_use]
    pub const fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Per-command timeout as a [`Duration`].
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// What happens after setup completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    /// Delay before the completion event fires, giving the app time to read
    /// the final status.
    pub restart_delay_secs: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            restart_delay_secs: 2,
        }
    }
}

impl CompletionSettings {
    /// Restart delay as a [`Duration`].
    #[must_use]
    pub const fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

/// Local status API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Whether to serve the API at all.
    pub enabled: bool,
    /// Listen address. Loopback by default.
    pub bind: SocketAddr,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 3000)),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `path` (if it exists) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source is malformed or the result fails
    /// [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check field values.
    ///
    /// # Errors
    ///
    /// Returns the single invalid field, or all of them if several are invalid.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut reject = |field, message: &str| {
            errors.push(ConfigError::ValidationError {
                field,
                message: message.to_string(),
            });
        };

        if self.storage.path.as_os_str().is_empty() {
            reject("storage.path", "must not be empty");
        }
        if self.bluetooth.name_prefix.is_empty() {
            reject("bluetooth.name_prefix", "must not be empty");
        }
        if self.network.command_timeout_secs == 0 {
            reject("network.command_timeout_secs", "must be at least 1");
        }
        if self.network.probe_host.trim().is_empty() {
            reject("network.probe_host", "must not be empty");
        }
        if self.network.probe_timeout_secs == 0 {
            reject("network.probe_timeout_secs", "must be at least 1");
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Default location of the service configuration file.
///
/// On Raspberry Pi: `/etc/frame-setup/config.toml`
/// For development: the platform config directory.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Some(PathBuf::from("/etc/frame-setup/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "frame-setup")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = ServiceConfig::default();
        assert_eq!(config.storage.path, PathBuf::from("./config.json"));
        assert_eq!(config.bluetooth.name_prefix, "DominoFrame-");
        assert_eq!(config.network.settle_interval(), Duration::from_secs(3));
        assert_eq!(config.network.probe_host, "1.1.1.1");
        assert_eq!(config.completion.restart_delay(), Duration::from_secs(2));
        assert!(config.http.bind.ip().is_loopback());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = ServiceConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.network, NetworkSettings::default());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[network]\nsettle_secs = 5\n\n[http]\nenabled = false\n",
        )
        .unwrap();

        let config = ServiceConfig::load(Some(&path)).unwrap();
        assert_eq!(config.network.settle_secs, 5);
        assert_eq!(config.network.probe_host, "1.1.1.1");
        assert!(!config.http.enabled);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[bluetooth]\nname_prefix = \"\"\n").unwrap();

        let err = ServiceConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError {
                field: "bluetooth.name_prefix",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_collects_multiple_errors() {
        let mut config = ServiceConfig::default();
        config.network.command_timeout_secs = 0;
        config.network.probe_host = " ".into();

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_path_is_toml() {
        if let Some(path) = default_config_path() {
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
        }
    }
}
