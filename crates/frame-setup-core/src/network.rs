//! Joining Wi-Fi networks through NetworkManager.
//!
//! [`NetworkJoiner`] is the seam the state machine drives; [`NmcliJoiner`]
//! implements it by shelling out to `nmcli` and `ping`. Both calls carry their
//! own timeouts, so a hung tool cannot wedge the provisioning task.

use std::future::Future;
use std::io;
use std::process::{Output, Stdio};
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::NetworkSettings;

/// Errors raised while joining or verifying a network.
#[derive(Debug, Error)]
pub enum JoinError {
    /// The tool could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The tool did not finish in time.
    #[error("'{command}' timed out after {secs} seconds")]
    Timeout {
        /// Command description (arguments omitted).
        command: &'static str,
        /// Timeout that elapsed.
        secs: u64,
    },

    /// The tool exited unsuccessfully.
    #[error("'{command}' failed ({status}): {stderr}")]
    CommandFailed {
        /// Command description (arguments omitted).
        command: &'static str,
        /// Exit status description.
        status: String,
        /// Trimmed standard error.
        stderr: String,
    },

    /// The join was issued but the network is not the active association.
    #[error("Not associated with '{ssid}' after settle interval")]
    NotAssociated {
        /// Target network.
        ssid: String,
    },
}

/// Joins wireless networks and checks internet reachability.
///
/// Implementations must be cheap to share; the provisioning task holds one
/// for its whole lifetime.
pub trait NetworkJoiner: Send + Sync + 'static {
    /// Join `ssid` and verify the association.
    ///
    /// An empty `passphrase` means an open network.
    fn join(
        &self,
        ssid: &str,
        passphrase: &str,
    ) -> impl Future<Output = Result<(), JoinError>> + Send;

    /// Probe a well-known external address. Any failure is just `false`.
    fn test_connectivity(&self) -> impl Future<Output = bool> + Send;
}

impl<T: NetworkJoiner> NetworkJoiner for Arc<T> {
    fn join(
        &self,
        ssid: &str,
        passphrase: &str,
    ) -> impl Future<Output = Result<(), JoinError>> + Send {
        (**self).join(ssid, passphrase)
    }

    fn test_connectivity(&self) -> impl Future<Output = bool> + Send {
        (**self).test_connectivity()
    }
}

/// An external program plus any leading arguments.
#[derive(Debug, Clone)]
struct Tool {
    program: String,
    leading_args: Vec<String>,
}

impl Tool {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            leading_args: Vec::new(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// [`NetworkJoiner`] backed by NetworkManager's `nmcli` and `ping`.
#[derive(Debug, Clone)]
pub struct NmcliJoiner {
    settings: NetworkSettings,
    nmcli: Tool,
    ping: Tool,
}

impl NmcliJoiner {
    /// Create a joiner using the system `nmcli` and `ping`.
    #[must_use]
    pub fn new(settings: NetworkSettings) -> Self {
        Self {
            settings,
            nmcli: Tool::new("nmcli"),
            ping: Tool::new("ping"),
        }
    }

    /// Run one tool invocation with the command timeout applied.
    async fn run(
        &self,
        tool: &Tool,
        label: &'static str,
        args: &[&str],
    ) -> Result<Output, JoinError> {
        let mut cmd = tool.command();
        cmd.args(args);

        let secs = self.settings.command_timeout_secs;
        match timeout(self.settings.command_timeout(), cmd.output()).await {
            Err(_) => Err(JoinError::Timeout {
                command: label,
                secs,
            }),
            Ok(Err(source)) => Err(JoinError::Spawn {
                program: tool.program.clone(),
                source,
            }),
            Ok(Ok(output)) => Ok(output),
        }
    }

    /// Like [`run`](Self::run) but a non-zero exit is an error.
    async fn run_checked(
        &self,
        tool: &Tool,
        label: &'static str,
        args: &[&str],
    ) -> Result<Output, JoinError> {
        let output = self.run(tool, label, args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(JoinError::CommandFailed {
                command: label,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn profile_exists(&self, ssid: &str) -> Result<bool, JoinError> {
        let output = self
            .run(&self.nmcli, "nmcli connection show", &["connection", "show", ssid])
            .await?;
        Ok(output.status.success())
    }

    async fn update_profile(&self, ssid: &str, passphrase: &str) -> Result<(), JoinError> {
        if !passphrase.is_empty() {
            self.run_checked(
                &self.nmcli,
                "nmcli connection modify",
                &["connection", "modify", ssid, "wifi-sec.psk", passphrase],
            )
            .await?;
        }
        self.run_checked(&self.nmcli, "nmcli connection up", &["connection", "up", ssid])
            .await?;
        Ok(())
    }

    async fn create_profile(&self, ssid: &str, passphrase: &str) -> Result<(), JoinError> {
        let mut args = vec!["device", "wifi", "connect", ssid];
        if !passphrase.is_empty() {
            args.extend(["password", passphrase]);
        }
        self.run_checked(&self.nmcli, "nmcli device wifi connect", &args)
            .await?;
        Ok(())
    }

    async fn verify_association(&self, ssid: &str) -> Result<(), JoinError> {
        let output = self
            .run_checked(
                &self.nmcli,
                "nmcli dev wifi",
                &["-t", "-f", "ACTIVE,SSID", "dev", "wifi"],
            )
            .await?;
        let listing = String::from_utf8_lossy(&output.stdout);
        if is_associated(&listing, ssid) {
            Ok(())
        } else {
            Err(JoinError::NotAssociated {
                ssid: ssid.to_string(),
            })
        }
    }
}

impl NetworkJoiner for NmcliJoiner {
    async fn join(&self, ssid: &str, passphrase: &str) -> Result<(), JoinError> {
        if self.profile_exists(ssid).await? {
            info!(ssid, "Updating existing connection profile");
            self.update_profile(ssid, passphrase).await?;
        } else {
            info!(ssid, "Creating new connection profile");
            self.create_profile(ssid, passphrase).await?;
        }

        sleep(self.settings.settle_interval()).await;
        self.verify_association(ssid).await?;

        info!(ssid, "Association verified");
        Ok(())
    }

    async fn test_connectivity(&self) -> bool {
        let wait = self.settings.probe_timeout_secs.to_string();
        let host = self.settings.probe_host.as_str();
        match self
            .run_checked(&self.ping, "ping", &["-c", "1", "-W", &wait, host])
            .await
        {
            Ok(_) => {
                debug!(host, "Connectivity probe succeeded");
                true
            }
            Err(e) => {
                warn!(host, error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

/// Whether `nmcli -t -f ACTIVE,SSID dev wifi` output lists `ssid` as active.
///
/// Terse mode escapes `:` and `\` inside values with a backslash.
#[must_use]
pub fn is_associated(listing: &str, ssid: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_once(':'))
        .any(|(active, name)| active == "yes" && unescape_terse(name) == ssid)
}

fn unescape_terse(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}
