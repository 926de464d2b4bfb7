//! The provisioning task.
//!
//! [`spawn`] moves a [`ProvisioningStateMachine`] onto its own task and hands
//! back a cloneable [`SetupHandle`]. Writes are queued on an unbounded channel
//! and applied strictly one at a time, so a transport callback never blocks
//! and a `complete_setup` in progress cannot interleave with a `reset`.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::SetupError;
use crate::machine::{ProvisioningStateMachine, SetupEvent};
use crate::network::NetworkJoiner;
use crate::status::{StatusFeed, StatusSubscription};
use crate::types::{SetupCompleted, SetupSnapshot};

/// The provisioning task has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Provisioning service is not running")]
pub struct ServiceStopped;

/// Outcome of [`SetupHandle::execute`].
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The write was applied and failed.
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// The task is gone.
    #[error(transparent)]
    Stopped(#[from] ServiceStopped),
}

struct Envelope {
    event: SetupEvent,
    reply: Option<oneshot::Sender<Result<(), SetupError>>>,
}

/// Cloneable handle to the provisioning task.
#[derive(Clone)]
pub struct SetupHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    feed: Arc<StatusFeed>,
    completion: broadcast::Sender<SetupCompleted>,
}

impl std::fmt::Debug for SetupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupHandle")
            .field("running", &!self.tx.is_closed())
            .field("status", &self.feed.current_status())
            .finish()
    }
}

impl SetupHandle {
    /// Queue a write and return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceStopped`] if the task has exited.
    pub fn submit(&self, event: SetupEvent) -> Result<(), ServiceStopped> {
        self.tx
            .send(Envelope { event, reply: None })
            .map_err(|_| ServiceStopped)
    }

    /// Queue a write and wait for it to be applied.
    ///
    /// # Errors
    ///
    /// Returns the write's own failure, or [`ExecuteError::Stopped`].
    pub async fn execute(&self, event: SetupEvent) -> Result<(), ExecuteError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                event,
                reply: Some(reply),
            })
            .map_err(|_| ServiceStopped)?;
        rx.await.map_err(|_| ServiceStopped)??;
        Ok(())
    }

    /// Latest status string.
    #[must_use]
    pub fn current_status(&self) -> String {
        self.feed.current_status()
    }

    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SetupSnapshot {
        self.feed.snapshot()
    }

    /// Every later status change, in order.
    #[must_use]
    pub fn subscribe_status(&self) -> StatusSubscription {
        self.feed.subscribe()
    }

    /// Receive [`SetupCompleted`] events.
    #[must_use]
    pub fn completion_events(&self) -> broadcast::Receiver<SetupCompleted> {
        self.completion.subscribe()
    }

    /// Whether the task is still accepting writes.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Start the provisioning task.
///
/// The task ends once every [`SetupHandle`] has been dropped.
pub fn spawn<J: NetworkJoiner>(machine: ProvisioningStateMachine<J>) -> (SetupHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SetupHandle {
        tx,
        feed: machine.feed(),
        completion: machine.completion_sender(),
    };
    let task = tokio::spawn(run(machine, rx));
    (handle, task)
}

async fn run<J: NetworkJoiner>(
    mut machine: ProvisioningStateMachine<J>,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) {
    info!("Provisioning service started");
    while let Some(Envelope { event, reply }) = rx.recv().await {
        // Failures were already logged and reported through the status.
        let result = machine.handle(event).await;
        if let Some(reply) = reply {
            let _ = reply.send(result);
        } else if let Err(e) = result {
            debug!(code = e.error_code(), "Queued write failed");
        }
    }
    info!("Provisioning service stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;
    use crate::identity::Identity;
    use crate::machine::status_text;
    use crate::network::JoinError;
    use crate::storage::ConfigStore;
    use crate::types::SetupPhase;

    struct AlwaysOnline;

    impl NetworkJoiner for AlwaysOnline {
        async fn join(&self, _ssid: &str, _passphrase: &str) -> Result<(), JoinError> {
            Ok(())
        }

        async fn test_connectivity(&self) -> bool {
            true
        }
    }

    /// Counts joins and holds each one open for a while.
    #[derive(Default)]
    struct SlowJoiner {
        joins: AtomicUsize,
    }

    impl NetworkJoiner for SlowJoiner {
        async fn join(&self, _ssid: &str, _passphrase: &str) -> Result<(), JoinError> {
            self.joins.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }

        async fn test_connectivity(&self) -> bool {
            true
        }
    }

    fn start_with<J: NetworkJoiner>(dir: &std::path::Path, joiner: J) -> (SetupHandle, JoinHandle<()>) {
        let store = Arc::new(ConfigStore::new(dir.join("config.json")));
        store.load_or_init().unwrap();
        let identity = Identity::load_or_generate(&store).unwrap();
        let machine =
            ProvisioningStateMachine::new(joiner, store, &identity, Arc::new(StatusFeed::new()))
                .with_restart_delay(Duration::ZERO);
        spawn(machine)
    }

    fn start(dir: &std::path::Path) -> (SetupHandle, JoinHandle<()>) {
        start_with(dir, AlwaysOnline)
    }

    #[tokio::test]
    async fn test_queued_writes_apply_in_order() {
        let dir = tempdir().unwrap();
        let (handle, _task) = start(dir.path());
        let mut sub = handle.subscribe_status();

        handle
            .submit(SetupEvent::Credentials(br#"{"ssid":"Home","password":"pw"}"#.to_vec()))
            .unwrap();
        handle
            .submit(SetupEvent::Command(b"test_wifi".to_vec()))
            .unwrap();
        handle
            .execute(SetupEvent::Command(b"reset".to_vec()))
            .await
            .unwrap();

        assert_eq!(
            sub.drain(),
            [
                status_text::CREDENTIALS_RECEIVED,
                status_text::TESTING,
                status_text::TEST_OK,
                status_text::RESET,
            ]
        );
        assert_eq!(handle.snapshot().phase, SetupPhase::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_complete_setup_joins_once() {
        let dir = tempdir().unwrap();
        let joiner = Arc::new(SlowJoiner::default());
        let (handle, _task) = start_with(dir.path(), Arc::clone(&joiner));

        handle
            .execute(SetupEvent::Credentials(br#"{"ssid":"Home","password":"pw"}"#.to_vec()))
            .await
            .unwrap();
        handle
            .execute(SetupEvent::DeviceConfig(
                br#"{"name":"Kitchen","frame_id":"abc","api_endpoint":"https://api.example.com","s3_bucket":"b"}"#
                    .to_vec(),
            ))
            .await
            .unwrap();
        let mut sub = handle.subscribe_status();

        let (first, second) = tokio::join!(
            handle.execute(SetupEvent::Command(b"complete_setup".to_vec())),
            handle.execute(SetupEvent::Command(b"complete_setup".to_vec())),
        );

        first.unwrap();
        assert!(matches!(
            second,
            Err(ExecuteError::Setup(SetupError::AlreadyComplete))
        ));
        assert_eq!(joiner.joins.load(Ordering::SeqCst), 1);
        assert_eq!(
            sub.drain(),
            [
                status_text::CONNECTING,
                status_text::CONNECTED,
                status_text::COMPLETE,
                SetupError::AlreadyComplete.status_message(),
            ]
        );
    }

    #[tokio::test]
    async fn test_execute_reports_failure() {
        let dir = tempdir().unwrap();
        let (handle, _task) = start(dir.path());

        let err = handle
            .execute(SetupEvent::Command(b"complete_setup".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Setup(SetupError::MissingCredentials)));
        assert!(handle.current_status().starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_task_stops_when_handles_dropped() {
        let dir = tempdir().unwrap();
        let (handle, task) = start(dir.path());
        let other = handle.clone();
        assert!(other.is_running());

        drop(handle);
        drop(other);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
