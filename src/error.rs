use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::CharacteristicRole;

/// Failure reported by the platform BLE adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("device has no GATT server")]
    NoGattServer,

    #[error("GATT server is disconnected")]
    Disconnected,

    #[error("{0}")]
    Failed(String),
}

/// Error type for the BLE transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Web Bluetooth API not supported")]
    AdapterUnavailable,

    #[error("unknown port: {0}")]
    UnknownPort(String),

    #[error("a connection attempt is already in progress")]
    ConnectInProgress,

    #[error("a connection is already open")]
    AlreadyConnected,

    #[error("GATT connect failed: {0}")]
    GattConnectFailed(AdapterError),

    #[error("Unsupported device")]
    UnsupportedDevice,

    #[error("unexpected {role} characteristic found - should be {expected}")]
    MissingCharacteristic {
        role: CharacteristicRole,
        expected: Uuid,
    },

    #[error("No read characteristic")]
    NoReadCharacteristic,

    #[error("Read characteristic unable to notify.")]
    NotifyUnsupported,

    #[error("No write characteristic available or characteristic is invalid")]
    NoWriteCharacteristic,

    #[error("GATT Server is disconnected. Cannot perform GATT operations.")]
    LinkDown,

    #[error("failed to send data: {0}")]
    WriteFailed(AdapterError),

    #[error("failed to close connection: {0}")]
    TeardownFailed(AdapterError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl TransportError {
    /// True for the guard failures that reject a write before it reaches the
    /// adapter.
    pub fn is_write_unavailable(&self) -> bool {
        matches!(self, Self::NoWriteCharacteristic | Self::LinkDown)
    }
}
