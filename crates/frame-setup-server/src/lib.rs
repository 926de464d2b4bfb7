//! # frame-setup-server
//!
//! Runtime shell around `frame-setup-core`: the BlueZ GATT transport, the
//! loopback status API and logging setup.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
#[cfg(feature = "bluetooth")]
pub mod gatt;
pub mod logging;
pub mod state;
