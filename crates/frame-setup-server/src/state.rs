//! Application state shared across handlers and the GATT transport.

use std::sync::Arc;

use frame_setup_core::{ChannelDispatcher, Identity, SetupHandle};

/// Shared handle to [`AppState`].
pub type SharedState = Arc<AppState>;

/// Everything a handler needs. Mutable setup state lives on the provisioning
/// task; this struct is read-only.
#[derive(Debug)]
pub struct AppState {
    dispatcher: ChannelDispatcher,
    frame_id: String,
    advertised_name: String,
}

impl AppState {
    /// Build state for a running provisioning service advertising as
    /// `name_prefix` plus the frame id.
    #[must_use]
    pub fn new(handle: SetupHandle, identity: &Identity, name_prefix: &str) -> Self {
        Self {
            dispatcher: ChannelDispatcher::new(handle),
            frame_id: identity.frame_id().to_string(),
            advertised_name: identity.advertised_name(name_prefix),
        }
    }

    /// Wrap in an [`Arc`].
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    /// Channel router.
    #[must_use]
    pub const fn dispatcher(&self) -> &ChannelDispatcher {
        &self.dispatcher
    }

    /// Provisioning service handle.
    #[must_use]
    pub const fn setup(&self) -> &SetupHandle {
        self.dispatcher.handle()
    }

    /// Persisted frame id.
    #[must_use]
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    /// BLE local name.
    #[must_use]
    pub fn advertised_name(&self) -> &str {
        &self.advertised_name
    }
}
