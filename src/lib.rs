//! BLE serial link
//!
//! Turns a platform BLE GATT API into a byte-stream serial link for a single
//! connected peripheral. See [`infrastructure::bluetooth`] for the transport
//! itself and [`domain`] for the data model, settings and the checksum quirk.
//!
//! All transport work is single-threaded: run it on a current-thread tokio
//! runtime inside a [`tokio::task::LocalSet`].

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod utils;

pub use domain::models::{
    ConnectOptions, ConnectionInfo, ConnectionStats, DeviceDescriptor, DeviceHandle,
    MessageSeverity, PortDescriptor, SendResult, StatusMessage, TransportEvent,
};
pub use domain::settings::{Settings, SettingsService};
pub use error::{AdapterError, TransportError};
pub use infrastructure::bluetooth::BleTransport;
