//! Platform BLE adapter contract
//!
//! The transport never talks to a Bluetooth stack directly. A platform glue
//! layer implements [`BluetoothAdapter`] and pushes [`AdapterEvent`]s into the
//! sink registered with [`BluetoothAdapter::set_event_sink`].

use async_trait::async_trait;
use uuid::Uuid;

pub use crate::domain::models::DeviceHandle;
use crate::error::AdapterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattServerHandle {
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub device_id: String,
    pub instance: u32,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Typical serial-bridge characteristic: writable and notifying.
    pub const SERIAL: Self = Self {
        read: true,
        write: true,
        write_without_response: true,
        notify: true,
        indicate: false,
    };

    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub device_id: String,
    pub instance: u32,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// Arguments of the permission-gated device picker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDeviceOptions {
    pub accept_all_devices: bool,
    /// Only offer devices advertising one of these services.
    pub filters: Vec<Uuid>,
    /// Services the caller may access once the device is granted.
    pub optional_services: Vec<Uuid>,
}

/// Events pushed by the adapter.
///
/// `ValueChanged::value` borrows adapter-owned storage that may be recycled
/// as soon as the sink returns.
#[derive(Debug, Clone, Copy)]
pub enum AdapterEvent<'a> {
    DeviceConnected(&'a DeviceHandle),
    DeviceDisconnected(&'a DeviceHandle),
    GattServerDisconnected(&'a DeviceHandle),
    ValueChanged {
        characteristic: &'a CharacteristicHandle,
        value: &'a [u8],
    },
}

pub type EventSink = Box<dyn Fn(AdapterEvent<'_>)>;

#[async_trait(?Send)]
pub trait BluetoothAdapter {
    /// Whether the platform exposes a BLE API at all.
    fn is_supported(&self) -> bool;

    /// Whether a radio is currently available.
    async fn availability(&self) -> bool;

    /// Devices the user already granted access to.
    async fn known_devices(&self) -> Result<Vec<DeviceHandle>, AdapterError>;

    /// Show the device picker. `Ok(None)` means the user dismissed it.
    async fn request_device(
        &self,
        options: &RequestDeviceOptions,
    ) -> Result<Option<DeviceHandle>, AdapterError>;

    async fn gatt_connect(&self, device: &DeviceHandle) -> Result<GattServerHandle, AdapterError>;

    fn gatt_disconnect(&self, device: &DeviceHandle) -> Result<(), AdapterError>;

    /// Live GATT connection flag.
    fn is_gatt_connected(&self, device: &DeviceHandle) -> bool;

    async fn primary_services(
        &self,
        server: &GattServerHandle,
    ) -> Result<Vec<ServiceHandle>, AdapterError>;

    async fn characteristics(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicHandle>, AdapterError>;

    async fn start_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), AdapterError>;

    async fn stop_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), AdapterError>;

    /// Not safe for concurrent invocation on the same characteristic.
    async fn write_value(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<(), AdapterError>;

    /// Replace the sink receiving pushed events. Events are delivered
    /// synchronously, in the order the stack reports them.
    fn set_event_sink(&self, sink: EventSink);
}
