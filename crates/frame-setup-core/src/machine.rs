//! The provisioning state machine.
//!
//! [`ProvisioningStateMachine`] owns the in-memory setup data and turns channel
//! writes into phase transitions, network joins and store commits. Every
//! operation takes `&mut self`; the [`service`](crate::service) actor is the
//! single owner at runtime, which makes each operation (including the whole
//! `complete_setup` sequence) a critical section.
//!
//! ```text
//! Idle ──creds──► CredentialsReceived ──config──┐
//!   └───config──► ConfigReceived ──────creds────┴► ReadyToComplete
//!                                                     │ complete_setup
//!                                                     ▼
//!        (join failed: back to ReadyToComplete) ◄── Connecting
//!                                                     ▼
//!                                                  Connected ─► Persisting ─► Complete
//! ```
//!
//! `reset` returns to `Idle` from anywhere. Failures never leave the machine
//! stuck: they set an `Error:` status and keep the pre-attempt phase.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::error::{Result, SetupError};
use crate::identity::Identity;
use crate::network::NetworkJoiner;
use crate::status::{StatusFeed, INITIAL_STATUS};
use crate::storage::ConfigStore;
use crate::types::{Command, Credentials, DeviceConfig, SetupCompleted, SetupPhase, SetupSnapshot};

/// Status strings for successful steps. Failure strings live on
/// [`SetupError::status_message`].
pub mod status_text {
    /// Credentials accepted.
    pub const CREDENTIALS_RECEIVED: &str = "WiFi credentials received";
    /// Device config accepted.
    pub const CONFIG_RECEIVED: &str = "Frame config received";
    /// Join started.
    pub const CONNECTING: &str = "Connecting to WiFi...";
    /// Join verified, commit starting.
    pub const CONNECTED: &str = "WiFi connected, saving config...";
    /// Setup finished.
    pub const COMPLETE: &str = "Setup complete! Restarting...";
    /// Reset done.
    pub const RESET: &str = "Setup reset, ready for new configuration";
    /// Probe started.
    pub const TESTING: &str = "Testing WiFi connection...";
    /// Probe succeeded.
    pub const TEST_OK: &str = "WiFi test successful";
}

/// Keys written to the store when setup completes.
pub mod keys {
    /// Frame display name.
    pub const FRAME_NAME: &str = "frame_name";
    /// Backend API endpoint.
    pub const API_ENDPOINT: &str = "api_endpoint";
    /// Image bucket.
    pub const S3_BUCKET: &str = "s3_bucket";
    /// Completion flag.
    pub const SETUP_COMPLETE: &str = "setup_complete";
    /// Completion time (RFC 3339).
    pub const SETUP_TIME: &str = "setup_time";
}

/// Default delay before [`SetupCompleted`] is broadcast.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(2);

/// One inbound channel write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupEvent {
    /// Raw credentials payload.
    Credentials(Vec<u8>),
    /// Raw device-config payload.
    DeviceConfig(Vec<u8>),
    /// Raw command string.
    Command(Vec<u8>),
}

/// Provisioning state machine.
pub struct ProvisioningStateMachine<J> {
    joiner: J,
    store: Arc<ConfigStore>,
    frame_id: String,
    feed: Arc<StatusFeed>,
    completion: broadcast::Sender<SetupCompleted>,
    restart_delay: Duration,

    credentials: Option<Credentials>,
    device_config: Option<DeviceConfig>,
    phase: SetupPhase,
    setup_complete: bool,
    status: String,
}

impl<J: NetworkJoiner> ProvisioningStateMachine<J> {
    /// Create a machine in the `Idle` phase.
    pub fn new(joiner: J, store: Arc<ConfigStore>, identity: &Identity, feed: Arc<StatusFeed>) -> Self {
        let (completion, _) = broadcast::channel(4);
        let machine = Self {
            joiner,
            store,
            frame_id: identity.frame_id().to_string(),
            feed,
            completion,
            restart_delay: DEFAULT_RESTART_DELAY,
            credentials: None,
            device_config: None,
            phase: SetupPhase::Idle,
            setup_complete: false,
            status: INITIAL_STATUS.to_string(),
        };
        machine.feed.update_silently(machine.snapshot());
        machine
    }

    /// Override the delay before the completion event fires.
    #[must_use]
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Sender side of the completion event channel.
    #[must_use]
    pub fn completion_sender(&self) -> broadcast::Sender<SetupCompleted> {
        self.completion.clone()
    }

    /// Shared status feed.
    #[must_use]
    pub fn feed(&self) -> Arc<StatusFeed> {
        Arc::clone(&self.feed)
    }

    /// Current status string.
    #[must_use]
    pub fn current_status(&self) -> &str {
        &self.status
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SetupPhase {
        self.phase
    }

    /// Whether setup completed since the last reset.
    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete
    }

    /// Held credentials.
    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Held device config.
    #[must_use]
    pub const fn device_config(&self) -> Option<&DeviceConfig> {
        self.device_config.as_ref()
    }

    /// Point-in-time view.
    #[must_use]
    pub fn snapshot(&self) -> SetupSnapshot {
        SetupSnapshot {
            status: self.status.clone(),
            phase: self.phase,
            setup_complete: self.setup_complete,
        }
    }

    /// Apply one channel write.
    ///
    /// # Errors
    ///
    /// Returns the failure that was also reported through the status.
    pub async fn handle(&mut self, event: SetupEvent) -> Result<()> {
        match event {
            SetupEvent::Credentials(bytes) => self.submit_credentials(&bytes),
            SetupEvent::DeviceConfig(bytes) => self.submit_device_config(&bytes),
            SetupEvent::Command(bytes) => self.submit_command(&bytes).await,
        }
    }

    /// Store Wi-Fi credentials (last write wins).
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidPayload`] if the payload does not parse.
    pub fn submit_credentials(&mut self, bytes: &[u8]) -> Result<()> {
        info!(len = bytes.len(), "Received WiFi credentials");
        let creds = match Credentials::from_payload(bytes) {
            Ok(creds) => creds,
            Err(e) => return self.fail(e),
        };

        info!(ssid = %creds.ssid, open = creds.is_open(), "WiFi credentials accepted");
        self.credentials = Some(creds);
        self.settle_input_phase();
        self.set_status(status_text::CREDENTIALS_RECEIVED);
        Ok(())
    }

    /// Store the device config (last write wins).
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidPayload`] if the payload does not parse.
    pub fn submit_device_config(&mut self, bytes: &[u8]) -> Result<()> {
        info!(len = bytes.len(), "Received frame config");
        let config = match DeviceConfig::from_payload(bytes) {
            Ok(config) => config,
            Err(e) => return self.fail(e),
        };

        info!(name = %config.name, frame_id = %config.frame_id, "Frame config accepted");
        self.device_config = Some(config);
        self.settle_input_phase();
        self.set_status(status_text::CONFIG_RECEIVED);
        Ok(())
    }

    /// Parse and run a command.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::UnknownCommand`] for unrecognized input, or the
    /// command's own failure.
    pub async fn submit_command(&mut self, bytes: &[u8]) -> Result<()> {
        let raw = String::from_utf8_lossy(bytes);
        info!(command = %raw, "Received command");
        let command = match raw.parse::<Command>() {
            Ok(command) => command,
            Err(e) => return self.fail(e),
        };

        match command {
            Command::CompleteSetup => self.complete_setup().await,
            Command::Reset => {
                self.reset();
                Ok(())
            }
            Command::TestWifi => self.test_wifi().await,
        }
    }

    /// Join the network and commit the configuration.
    ///
    /// # Errors
    ///
    /// Fails fast on missing input; otherwise returns the join or commit
    /// failure after restoring the pre-attempt phase.
    #[instrument(skip(self), fields(frame_id = %self.frame_id))]
    pub async fn complete_setup(&mut self) -> Result<()> {
        info!(
            has_credentials = self.credentials.is_some(),
            has_config = self.device_config.is_some(),
            "Starting setup completion"
        );

        if self.phase == SetupPhase::Complete {
            return self.fail(SetupError::AlreadyComplete);
        }
        let Some(creds) = self.credentials.clone() else {
            return self.fail(SetupError::MissingCredentials);
        };
        let Some(config) = self.device_config.clone() else {
            return self.fail(SetupError::MissingConfig);
        };
        let resume = self.phase;

        self.phase = SetupPhase::Connecting;
        self.set_status(status_text::CONNECTING);
        if let Err(e) = self.joiner.join(&creds.ssid, &creds.password).await {
            self.phase = resume;
            return self.fail(e.into());
        }

        self.phase = SetupPhase::Connected;
        self.set_status(status_text::CONNECTED);

        self.phase = SetupPhase::Persisting;
        self.feed.update_silently(self.snapshot());
        let completed_at = Utc::now();
        if let Err(e) = self.commit(&config, completed_at).await {
            self.phase = resume;
            return self.fail(e);
        }

        self.phase = SetupPhase::Complete;
        self.setup_complete = true;
        self.set_status(status_text::COMPLETE);
        info!(frame_name = %config.name, "Setup complete");

        self.schedule_completion_event(SetupCompleted {
            frame_id: self.frame_id.clone(),
            frame_name: config.name,
            completed_at,
        });
        Ok(())
    }

    /// Forget all in-memory setup data. The persisted identity is untouched.
    pub fn reset(&mut self) {
        self.credentials = None;
        self.device_config = None;
        self.setup_complete = false;
        self.phase = SetupPhase::Idle;
        info!("Setup data reset");
        self.set_status(status_text::RESET);
    }

    /// Probe internet reachability without changing phase or completion.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::MissingCredentials`] or
    /// [`SetupError::ConnectivityCheckFailed`].
    pub async fn test_wifi(&mut self) -> Result<()> {
        if self.credentials.is_none() {
            return self.fail(SetupError::MissingCredentials);
        }

        self.set_status(status_text::TESTING);
        if self.joiner.test_connectivity().await {
            self.set_status(status_text::TEST_OK);
            Ok(())
        } else {
            self.fail(SetupError::ConnectivityCheckFailed)
        }
    }

    /// Write the committed fields in one document update, off the async
    /// worker threads. The identity key is never part of the update.
    async fn commit(&self, config: &DeviceConfig, at: chrono::DateTime<Utc>) -> Result<()> {
        let updates = vec![
            (keys::FRAME_NAME.to_string(), Value::from(config.name.clone())),
            (keys::API_ENDPOINT.to_string(), Value::from(config.api_endpoint.clone())),
            (keys::S3_BUCKET.to_string(), Value::from(config.s3_bucket.clone())),
            (keys::SETUP_COMPLETE.to_string(), Value::from(true)),
            (
                keys::SETUP_TIME.to_string(),
                Value::from(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ),
        ];

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.set_many(updates))
            .await
            .map_err(|e| SetupError::PersistFailed(e.to_string()))??;
        Ok(())
    }

    /// Fire-and-forget: nothing waits on this and delivery is best-effort.
    fn schedule_completion_event(&self, event: SetupCompleted) {
        let tx = self.completion.clone();
        let delay = self.restart_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!(frame_id = %event.frame_id, "Signalling setup completion");
            if tx.send(event).is_err() {
                info!("No listeners for setup completion");
            }
        });
    }

    /// Recompute the phase after an input write. `Complete` is sticky.
    fn settle_input_phase(&mut self) {
        if self.phase != SetupPhase::Complete {
            self.phase =
                SetupPhase::from_inputs(self.credentials.is_some(), self.device_config.is_some());
        }
    }

    fn set_status(&mut self, status: &str) {
        status.clone_into(&mut self.status);
        self.feed.publish(self.snapshot());
    }

    fn fail(&mut self, err: SetupError) -> Result<()> {
        warn!(
            code = err.error_code(),
            input = err.is_input_error(),
            retryable = err.is_retryable(),
            error = %err,
            "Setup step failed"
        );
        self.set_status(err.status_message());
        Err(err)
    }
}
