//! # frame-setup-server
//!
//! BLE provisioning service for Domino photo frames.
//!
//! This binary:
//! - Loads or generates the frame identity
//! - Runs the provisioning task against NetworkManager
//! - Serves the provisioning GATT service over BlueZ (`bluetooth` feature)
//! - Serves the loopback status API
//!
//! ## Running
//!
//! ```bash
//! # Development, no radio: inject writes over HTTP
//! cargo run -p frame-setup-server --no-default-features --features mock-bluetooth
//!
//! # Production (on Raspberry Pi)
//! FRAME_SETUP_ENV=production ./frame-setup-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use frame_setup_core::{
    default_config_path, ConfigStore, Identity, IdentitySource, NmcliJoiner,
    ProvisioningStateMachine, ServiceConfig, SetupCompleted, SetupError, StatusFeed,
};
use frame_setup_server::api;
use frame_setup_server::logging::{self, LogMode};
use frame_setup_server::state::{AppState, SharedState};
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

/// Environment variable overriding the config file location.
const CONFIG_PATH_VAR: &str = "FRAME_SETUP_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(LogMode::from_env())?;

    let config_path = std::env::var_os(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .or_else(default_config_path);
    let config = ServiceConfig::load(config_path.as_deref())
        .with_context(|| format!("Failed to load configuration from {config_path:?}"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        store = %config.storage.path.display(),
        "Starting frame-setup-server"
    );

    let store = Arc::new(ConfigStore::new(&config.storage.path));
    match store.load_or_init() {
        Ok(keys) => info!(keys, "Loaded persisted configuration"),
        Err(e) => {
            let e = SetupError::from(e);
            warn!(code = e.error_code(), error = %e, "Starting with empty configuration");
        }
    }

    let identity =
        Identity::load_or_generate(&store).context("Failed to persist a new frame id")?;
    if identity.source() == IdentitySource::Generated {
        info!(frame_id = identity.frame_id(), "First start, identity created");
    }

    let machine = ProvisioningStateMachine::new(
        NmcliJoiner::new(config.network.clone()),
        Arc::clone(&store),
        &identity,
        Arc::new(StatusFeed::new()),
    )
    .with_restart_delay(config.completion.restart_delay());
    let (handle, _provisioning) = frame_setup_core::spawn(machine);

    tokio::spawn(log_completions(handle.completion_events()));

    let state = AppState::new(handle, &identity, &config.bluetooth.name_prefix).shared();

    #[cfg(feature = "bluetooth")]
    let gatt = frame_setup_server::gatt::GattServer::start(
        &config.bluetooth,
        state.advertised_name(),
        state.dispatcher().clone(),
    )
    .await
    .context("Failed to start BLE provisioning service")?;

    #[cfg(not(feature = "bluetooth"))]
    warn!("Built without the bluetooth feature; no BLE transport is running");

    let http = config.http.enabled.then(|| {
        let state = Arc::clone(&state);
        let bind = config.http.bind;
        tokio::spawn(async move {
            if let Err(e) = serve_http(bind, state).await {
                error!(error = %format!("{e:#}"), "Status API stopped");
            }
        })
    });

    shutdown_signal().await?;

    #[cfg(feature = "bluetooth")]
    gatt.shutdown();
    if let Some(http) = http {
        http.abort();
    }
    info!("frame-setup-server stopped");

    Ok(())
}

/// Serve the loopback status API until the task is aborted.
async fn serve_http(bind: SocketAddr, state: SharedState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!("Status API listening on {}", bind);

    axum::serve(listener, api::create_router(state)).await?;
    Ok(())
}

/// Log completion events. Restarting the frame app is left to the supervisor.
async fn log_completions(mut events: broadcast::Receiver<SetupCompleted>) {
    loop {
        match events.recv().await {
            Ok(event) => info!(
                frame_id = %event.frame_id,
                frame_name = %event.frame_name,
                completed_at = %event.completed_at,
                "Setup complete, frame app may restart"
            ),
            Err(RecvError::Lagged(missed)) => warn!(missed, "Missed completion events"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}
