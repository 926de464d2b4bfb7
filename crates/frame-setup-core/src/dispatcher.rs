//! Transport-facing channel layout and routing.
//!
//! ```text
//! Service c63dc91d-efa5-43f2-9e26-7d30ae8eb4fc
//! ├── Credentials   ...9001  write         JSON {ssid, password}
//! ├── DeviceConfig  ...9002  write         JSON {name, frame_id, api_endpoint, s3_bucket}
//! ├── Status        ...9003  read, notify  UTF-8 status string
//! └── Command       ...9004  write         complete_setup | reset | test_wifi
//! ```
//!
//! The dispatcher is the only thing a transport talks to. It never blocks:
//! writes are queued on the provisioning task and reads come from the latest
//! published snapshot.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::machine::SetupEvent;
use crate::service::{ServiceStopped, SetupHandle};
use crate::status::StatusSubscription;

/// Primary service UUID.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xc63d_c91d_efa5_43f2_9e26_7d30_ae8e_b4fc);

/// The four provisioning channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Wi-Fi credentials (write).
    Credentials,
    /// Device configuration (write).
    DeviceConfig,
    /// Status string (read, notify).
    Status,
    /// Control command (write).
    Command,
}

impl Channel {
    /// Every channel, in characteristic order.
    pub const ALL: [Self; 4] = [
        Self::Credentials,
        Self::DeviceConfig,
        Self::Status,
        Self::Command,
    ];

    /// Characteristic UUID.
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        match self {
            Self::Credentials => Uuid::from_u128(0x1234_5678_1234_1234_1234_1234_5678_9001),
            Self::DeviceConfig => Uuid::from_u128(0x1234_5678_1234_1234_1234_1234_5678_9002),
            Self::Status => Uuid::from_u128(0x1234_5678_1234_1234_1234_1234_5678_9003),
            Self::Command => Uuid::from_u128(0x1234_5678_1234_1234_1234_1234_5678_9004),
        }
    }

    /// Look a channel up by characteristic UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == uuid)
    }

    /// Whether peers write to this channel.
    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        !matches!(self, Self::Status)
    }

    /// Whether peers read and subscribe to this channel.
    #[inline]
    #[must_use]
    pub const fn is_readable(self) -> bool {
        matches!(self, Self::Status)
    }

    /// Short name used in logs and the local API.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::DeviceConfig => "config",
            Self::Status => "status",
            Self::Command => "command",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| DispatchError::UnknownChannel(s.to_string()))
    }
}

/// Transport-level routing failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No channel has this name.
    #[error("Unknown channel '{0}'")]
    UnknownChannel(String),

    /// Write to a read-only channel.
    #[error("Channel '{0}' is not writable")]
    NotWritable(Channel),

    /// Read from a write-only channel.
    #[error("Channel '{0}' is not readable")]
    NotReadable(Channel),

    /// The provisioning task is gone.
    #[error(transparent)]
    Stopped(#[from] ServiceStopped),
}

/// Routes transport reads and writes to the provisioning task.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    handle: SetupHandle,
}

impl ChannelDispatcher {
    /// Wrap a running service.
    #[must_use]
    pub const fn new(handle: SetupHandle) -> Self {
        Self { handle }
    }

    /// The underlying service handle.
    #[must_use]
    pub const fn handle(&self) -> &SetupHandle {
        &self.handle
    }

    /// Map a write to its event without queuing it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotWritable`] for the status channel.
    pub fn event_for(channel: Channel, bytes: &[u8]) -> Result<SetupEvent, DispatchError> {
        let bytes = bytes.to_vec();
        match channel {
            Channel::Credentials => Ok(SetupEvent::Credentials(bytes)),
            Channel::DeviceConfig => Ok(SetupEvent::DeviceConfig(bytes)),
            Channel::Command => Ok(SetupEvent::Command(bytes)),
            Channel::Status => Err(DispatchError::NotWritable(channel)),
        }
    }

    /// Queue a peer write. Returns as soon as the write is queued; the
    /// outcome shows up on the status channel.
    ///
    /// # Errors
    ///
    /// Returns an error for the status channel or a stopped service.
    pub fn on_write(&self, channel: Channel, bytes: &[u8]) -> Result<(), DispatchError> {
        let event = Self::event_for(channel, bytes)?;
        debug!(%channel, len = bytes.len(), "Channel write");
        self.handle.submit(event)?;
        Ok(())
    }

    /// Serve a peer read: the current status as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotReadable`] for write-only channels.
    pub fn on_read(&self, channel: Channel) -> Result<Vec<u8>, DispatchError> {
        if !channel.is_readable() {
            return Err(DispatchError::NotReadable(channel));
        }
        Ok(self.handle.current_status().into_bytes())
    }

    /// Status notifications for one subscribed peer.
    #[must_use]
    pub fn subscribe(&self) -> StatusSubscription {
        self.handle.subscribe_status()
    }
}
