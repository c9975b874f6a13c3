use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportError;
/// Adapter-owned reference to a peripheral. Identity is the device id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub id: String,
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
        }
    }

    pub fn same_device(&self, other: &DeviceHandle) -> bool {
        self.id == other.id
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// A peripheral exposed to callers under a stable logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    /// `bluetooth_<n>`, never reused within a session
    pub path: String,
    pub display_name: String,
    pub vendor_id: String,
    pub product_id: String,
    pub device: DeviceHandle,
}

/// Catalog entry describing a supported BLE serial module family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub service_uuid: Uuid,
    pub write_characteristic: Uuid,
    pub read_characteristic: Uuid,
    #[serde(default)]
    pub susceptible_to_crc_corruption: bool,
    /// Overrides the transport-wide settle delay before tearing down a
    /// canceled connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown_settle_ms: Option<u64>,
}

/// Which of the two bound characteristics an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicRole {
    Write,
    Read,
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharacteristicRole::Write => write!(f, "write"),
            CharacteristicRole::Read => write!(f, "read"),
        }
    }
}

/// Options accepted by `connect`.
///
/// `baud_rate` exists for symmetry with wired serial transports; BLE ignores
/// it and only reports it back as the connection bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    pub baud_rate: u32,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self { baud_rate: 115_200 }
    }
}

/// Details published with a successful `Connected` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub bitrate: u32,
    pub device_name: String,
    pub descriptor_name: String,
}

/// Byte accounting of the current connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connection_id: Option<String>,
    pub bitrate: u32,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub failed: u32,
}

/// Outcome handed to a `send` callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub error: Option<TransportError>,
    pub bytes_sent: usize,
}

impl SendResult {
    pub fn sent(bytes_sent: usize) -> Self {
        Self {
            error: None,
            bytes_sent,
        }
    }

    pub fn failed(error: TransportError) -> Self {
        Self {
            error: Some(error),
            bytes_sent: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Events published by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    DeviceAdded(PortDescriptor),
    /// `None` when the adapter removed a device the registry never knew.
    DeviceRemoved(Option<PortDescriptor>),
    /// `None` for every unsuccessful or canceled connection attempt.
    Connected(Option<ConnectionInfo>),
    /// `false` when teardown reported an error.
    Disconnected(bool),
    Received(Vec<u8>),
}

/// User-facing message: a localization key plus interpolation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub key: &'static str,
    pub params: Vec<String>,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Error,
}
