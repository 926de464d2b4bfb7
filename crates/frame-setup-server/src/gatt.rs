//! BLE GATT transport over BlueZ.
//!
//! ```text
//! Service c63dc91d-efa5-43f2-9e26-7d30ae8eb4fc
//! ├── Credentials   (Write, Write Without Response)
//! ├── DeviceConfig  (Write, Write Without Response)
//! ├── Status        (Read, Notify)
//! └── Command       (Write, Write Without Response)
//! ```
//!
//! Callbacks only touch the [`ChannelDispatcher`], which queues writes and
//! serves reads from the latest snapshot, so BlueZ never waits on a network
//! join. Each notify session gets its own ordered status subscription.
//!
//! There is no pairing requirement. Setup is expected to happen within
//! physical reach of the frame.

use bluer::adv::{Advertisement, AdvertisementHandle};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier,
    CharacteristicNotify, CharacteristicNotifyMethod, CharacteristicRead, CharacteristicWrite,
    CharacteristicWriteMethod, ReqError, Service,
};
use bluer::{Adapter, Session};
use frame_setup_core::{
    BluetoothSettings, Channel, ChannelDispatcher, StatusSubscription, SERVICE_UUID,
};
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while bringing up the GATT server.
#[derive(Debug, Error)]
pub enum GattError {
    /// No usable adapter, or it could not be powered.
    #[error("Bluetooth adapter unavailable: {0}")]
    Adapter(#[source] bluer::Error),

    /// BlueZ rejected the advertisement.
    #[error("Failed to start advertising: {0}")]
    Advertise(#[source] bluer::Error),

    /// BlueZ rejected the GATT application.
    #[error("Failed to register GATT application: {0}")]
    Register(#[source] bluer::Error),
}

/// A registered GATT application plus its advertisement.
///
/// Dropping it unregisters both.
pub struct GattServer {
    adapter: Adapter,
    _app: ApplicationHandle,
    _advertisement: AdvertisementHandle,
    _session: Session,
}

impl std::fmt::Debug for GattServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattServer")
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

impl GattServer {
    /// Power the adapter, register the service and start advertising as
    /// `local_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if BlueZ is unreachable or rejects a step.
    pub async fn start(
        settings: &BluetoothSettings,
        local_name: &str,
        dispatcher: ChannelDispatcher,
    ) -> Result<Self, GattError> {
        let session = Session::new().await.map_err(GattError::Adapter)?;
        let adapter = match &settings.adapter {
            Some(name) => session.adapter(name).map_err(GattError::Adapter)?,
            None => session.default_adapter().await.map_err(GattError::Adapter)?,
        };
        adapter.set_powered(true).await.map_err(GattError::Adapter)?;
        let address = adapter.address().await.map_err(GattError::Adapter)?;
        info!(adapter = adapter.name(), %address, "Bluetooth adapter ready");

        let app = adapter
            .serve_gatt_application(application(&dispatcher))
            .await
            .map_err(GattError::Register)?;

        let advertisement = Advertisement {
            service_uuids: [SERVICE_UUID].into_iter().collect(),
            discoverable: Some(true),
            local_name: Some(local_name.to_string()),
            ..Default::default()
        };
        let advertisement = adapter
            .advertise(advertisement)
            .await
            .map_err(GattError::Advertise)?;
        info!(local_name, service = %SERVICE_UUID, "Advertising provisioning service");

        Ok(Self {
            adapter,
            _app: app,
            _advertisement: advertisement,
            _session: session,
        })
    }

    /// Stop advertising and unregister the service.
    pub fn shutdown(self) {
        info!(adapter = self.adapter.name(), "Stopping GATT server");
        drop(self);
    }
}

fn application(dispatcher: &ChannelDispatcher) -> Application {
    let characteristics = Channel::ALL
        .into_iter()
        .map(|channel| {
            if channel.is_readable() {
                status_characteristic(channel, dispatcher)
            } else {
                write_characteristic(channel, dispatcher)
            }
        })
        .collect();

    Application {
        services: vec![Service {
            uuid: SERVICE_UUID,
            primary: true,
            characteristics,
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn write_characteristic(channel: Channel, dispatcher: &ChannelDispatcher) -> Characteristic {
    let dispatcher = dispatcher.clone();
    Characteristic {
        uuid: channel.uuid(),
        write: Some(CharacteristicWrite {
            write: true,
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, req| {
                debug!(%channel, device = %req.device_address, mtu = req.mtu, "GATT write");
                let result = dispatcher.on_write(channel, &value).map_err(|e| {
                    warn!(%channel, error = %e, "Rejected GATT write");
                    ReqError::Failed
                });
                async move { result }.boxed()
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn status_characteristic(channel: Channel, dispatcher: &ChannelDispatcher) -> Characteristic {
    let reader = dispatcher.clone();
    let notifier_source = dispatcher.clone();
    Characteristic {
        uuid: channel.uuid(),
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |req| {
                let result = reader
                    .on_read(channel)
                    .map_err(|_| ReqError::NotSupported)
                    .and_then(|value| {
                        value
                            .get(usize::from(req.offset)..)
                            .map(<[u8]>::to_vec)
                            .ok_or(ReqError::InvalidOffset)
                    });
                async move { result }.boxed()
            }),
            ..Default::default()
        }),
        notify: Some(CharacteristicNotify {
            notify: true,
            method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                let subscription = notifier_source.subscribe();
                async move {
                    tokio::spawn(forward_status(subscription, notifier));
                }
                .boxed()
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Push every status change to one notify session until it ends.
async fn forward_status(mut subscription: StatusSubscription, mut notifier: CharacteristicNotifier) {
    info!("Status notify session started");
    while let Some(status) = subscription.recv().await {
        if notifier.is_stopped() {
            break;
        }
        if let Err(e) = notifier.notify(status.into_bytes()).await {
            debug!(error = %e, "Status notify failed");
            break;
        }
    }
    info!("Status notify session ended");
}
