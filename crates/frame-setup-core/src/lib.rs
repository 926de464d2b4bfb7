//! # frame-setup-core
//!
//! Core provisioning logic for Domino photo frames.
//!
//! A phone app connects over BLE, writes Wi-Fi credentials and a frame
//! configuration, then asks the frame to finish setup. This crate holds
//! everything except the radio:
//! - Persistent key/value document and the device identity token
//! - The provisioning state machine and its single-owner task
//! - Joining networks through NetworkManager
//! - Status fan-out to subscribed peers
//!
//! ## Architecture
//!
//! - [`types`] - Wire payloads, commands, phases and snapshots
//! - [`error`] - Unified error type and the `Error:` status contract
//! - [`storage`] - Atomic JSON document store
//! - [`identity`] - Frame id generation and persistence
//! - [`config`] - Layered service configuration
//! - [`network`] - The [`NetworkJoiner`] seam and its `nmcli` implementation
//! - [`status`] - Ordered status notifications
//! - [`machine`] - The [`ProvisioningStateMachine`]
//! - [`service`] - The provisioning task and its [`SetupHandle`]
//! - [`dispatcher`] - Channel UUIDs and transport routing

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod machine;
pub mod network;
pub mod service;
pub mod status;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use config::{
    default_config_path, BluetoothSettings, CompletionSettings, ConfigError, ConfigResult,
    HttpSettings, NetworkSettings, ServiceConfig, StorageSettings,
};
pub use dispatcher::{Channel, ChannelDispatcher, DispatchError, SERVICE_UUID};
pub use error::{Result, SetupError, ERROR_STATUS_PREFIX};
pub use identity::{Identity, IdentitySource, FRAME_ID_LEN};
pub use machine::{ProvisioningStateMachine, SetupEvent};
pub use network::{JoinError, NetworkJoiner, NmcliJoiner};
pub use service::{spawn, ExecuteError, ServiceStopped, SetupHandle};
pub use status::{StatusFeed, StatusSubscription, INITIAL_STATUS};
pub use storage::{ConfigStore, StoreError, DEFAULT_STORE_PATH};
pub use types::{
    Command, Credentials, DeviceConfig, PayloadKind, SetupCompleted, SetupPhase, SetupSnapshot,
};
