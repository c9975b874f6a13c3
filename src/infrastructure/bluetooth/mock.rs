//! In-memory adapter for tests and demos
//!
//! Scriptable stand-in for a platform BLE stack: devices, GATT tables,
//! picker answers, per-step failures and delays are all configured up front.
//! Pushed events are raised explicitly with [`MockAdapter::emit`],
//! [`MockAdapter::notify`] and [`MockAdapter::drop_link`].

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::models::DeviceDescriptor;
use crate::error::AdapterError;
use crate::infrastructure::bluetooth::adapter::{
    AdapterEvent, BluetoothAdapter, CharacteristicHandle, CharacteristicProperties, DeviceHandle,
    EventSink, GattServerHandle, RequestDeviceOptions, ServiceHandle,
};

/// Adapter operation that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockStep {
    KnownDevices,
    GattConnect,
    PrimaryServices,
    Characteristics,
    StartNotifications,
    StopNotifications,
    GattDisconnect,
}

#[derive(Debug, Clone)]
struct MockService {
    handle: ServiceHandle,
    characteristics: Vec<CharacteristicHandle>,
}

pub struct MockAdapter {
    supported: bool,
    devices: RefCell<Vec<DeviceHandle>>,
    services: RefCell<HashMap<String, Vec<MockService>>>,
    connected: RefCell<HashSet<String>>,
    next_instance: Cell<u32>,

    selection: RefCell<Option<Result<Option<DeviceHandle>, AdapterError>>>,
    last_request: RefCell<Option<RequestDeviceOptions>>,

    failures: RefCell<HashMap<MockStep, AdapterError>>,
    failing_writes: RefCell<HashSet<usize>>,
    connect_delay: Cell<Duration>,
    write_delay: Cell<Duration>,

    writes: RefCell<Vec<Vec<u8>>>,
    writes_in_flight: Cell<usize>,
    max_writes_in_flight: Cell<usize>,
    calls: RefCell<HashMap<MockStep, usize>>,

    sink: RefCell<Option<EventSink>>,
    scratch: RefCell<Vec<u8>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::with_support(true)
    }

    /// Adapter for a platform without any BLE API.
    pub fn unsupported() -> Self {
        Self::with_support(false)
    }

    fn with_support(supported: bool) -> Self {
        Self {
            supported,
            devices: RefCell::default(),
            services: RefCell::default(),
            connected: RefCell::default(),
            next_instance: Cell::new(1),
            selection: RefCell::default(),
            last_request: RefCell::default(),
            failures: RefCell::default(),
            failing_writes: RefCell::default(),
            connect_delay: Cell::new(Duration::ZERO),
            write_delay: Cell::new(Duration::ZERO),
            writes: RefCell::default(),
            writes_in_flight: Cell::new(0),
            max_writes_in_flight: Cell::new(0),
            calls: RefCell::default(),
            sink: RefCell::default(),
            scratch: RefCell::default(),
        }
    }

    /// Add a device the user has already granted.
    pub fn add_device(&self, id: &str, name: Option<&str>) -> DeviceHandle {
        let device = DeviceHandle::new(id, name);
        self.devices.borrow_mut().push(device.clone());
        device
    }

    /// Add a primary service with the given characteristics.
    pub fn add_service(
        &self,
        device: &DeviceHandle,
        uuid: Uuid,
        characteristics: &[(Uuid, CharacteristicProperties)],
    ) {
        let handle = ServiceHandle {
            device_id: device.id.clone(),
            instance: self.instance(),
            uuid,
        };
        let characteristics = characteristics
            .iter()
            .map(|(uuid, properties)| CharacteristicHandle {
                device_id: device.id.clone(),
                instance: self.instance(),
                uuid: *uuid,
                properties: *properties,
            })
            .collect();

        self.services
            .borrow_mut()
            .entry(device.id.clone())
            .or_default()
            .push(MockService {
                handle,
                characteristics,
            });
    }

    /// Add the service layout `descriptor` expects. A shared read/write UUID
    /// becomes a single characteristic.
    pub fn add_serial_service(&self, device: &DeviceHandle, descriptor: &DeviceDescriptor) {
        let mut characteristics = vec![(
            descriptor.write_characteristic,
            CharacteristicProperties::SERIAL,
        )];
        if descriptor.read_characteristic != descriptor.write_characteristic {
            characteristics.push((
                descriptor.read_characteristic,
                CharacteristicProperties::SERIAL,
            ));
        }
        self.add_service(device, descriptor.service_uuid, &characteristics);
    }

    fn instance(&self) -> u32 {
        let instance = self.next_instance.get();
        self.next_instance.set(instance + 1);
        instance
    }

    /// Answer for the next picker request. `None` means dismissed.
    pub fn select_next(&self, device: Option<DeviceHandle>) {
        *self.selection.borrow_mut() = Some(Ok(device));
    }

    pub fn fail_next_selection(&self, error: AdapterError) {
        *self.selection.borrow_mut() = Some(Err(error));
    }

    pub fn last_request(&self) -> Option<RequestDeviceOptions> {
        self.last_request.borrow().clone()
    }

    /// Make the next call of `step` fail.
    pub fn fail(&self, step: MockStep, error: AdapterError) {
        self.failures.borrow_mut().insert(step, error);
    }

    /// Make the write with this zero-based index fail.
    pub fn fail_write(&self, index: usize) {
        self.failing_writes.borrow_mut().insert(index);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay.set(delay);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay.set(delay);
    }

    /// Every payload handed to `write_value`, failed ones included.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.borrow().clone()
    }

    pub fn max_concurrent_writes(&self) -> usize {
        self.max_writes_in_flight.get()
    }

    pub fn call_count(&self, step: MockStep) -> usize {
        self.calls.borrow().get(&step).copied().unwrap_or(0)
    }

    pub fn is_linked(&self, device: &DeviceHandle) -> bool {
        self.connected.borrow().contains(&device.id)
    }

    /// Deliver an event to the registered sink.
    pub fn emit(&self, event: AdapterEvent<'_>) {
        if let Some(sink) = self.sink.borrow().as_ref() {
            sink(event);
        }
    }

    /// Push a notification. The buffer is overwritten once the sink returns,
    /// like a platform stack recycling its receive storage.
    pub fn notify(&self, characteristic: &CharacteristicHandle, value: &[u8]) {
        self.scratch.replace(value.to_vec());
        {
            let scratch = self.scratch.borrow();
            self.emit(AdapterEvent::ValueChanged {
                characteristic,
                value: &scratch,
            });
        }
        self.scratch.borrow_mut().fill(0xaa);
    }

    /// Remote side dropped the link.
    pub fn drop_link(&self, device: &DeviceHandle) {
        self.connected.borrow_mut().remove(&device.id);
        self.emit(AdapterEvent::GattServerDisconnected(device));
    }

    /// Characteristic handle by UUID, as the transport would have bound it.
    pub fn characteristic(&self, device: &DeviceHandle, uuid: &Uuid) -> Option<CharacteristicHandle> {
        self.services
            .borrow()
            .get(&device.id)?
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| &c.uuid == uuid)
            .cloned()
    }

    fn record(&self, step: MockStep) -> Result<(), AdapterError> {
        *self.calls.borrow_mut().entry(step).or_default() += 1;
        match self.failures.borrow_mut().remove(&step) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn ensure_linked(&self, device_id: &str) -> Result<(), AdapterError> {
        if self.connected.borrow().contains(device_id) {
            Ok(())
        } else {
            Err(AdapterError::Disconnected)
        }
    }
}

#[async_trait(?Send)]
impl BluetoothAdapter for MockAdapter {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn availability(&self) -> bool {
        self.supported
    }

    async fn known_devices(&self) -> Result<Vec<DeviceHandle>, AdapterError> {
        self.record(MockStep::KnownDevices)?;
        Ok(self.devices.borrow().clone())
    }

    async fn request_device(
        &self,
        options: &RequestDeviceOptions,
    ) -> Result<Option<DeviceHandle>, AdapterError> {
        self.last_request.replace(Some(options.clone()));
        let selection = self.selection.borrow_mut().take().unwrap_or(Ok(None))?;
        if let Some(device) = &selection {
            let mut devices = self.devices.borrow_mut();
            if !devices.iter().any(|d| d.same_device(device)) {
                devices.push(device.clone());
            }
        }
        Ok(selection)
    }

    async fn gatt_connect(&self, device: &DeviceHandle) -> Result<GattServerHandle, AdapterError> {
        let delay = self.connect_delay.get();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.record(MockStep::GattConnect)?;
        if !self.devices.borrow().iter().any(|d| d.same_device(device)) {
            return Err(AdapterError::NoGattServer);
        }
        self.connected.borrow_mut().insert(device.id.clone());
        Ok(GattServerHandle {
            device_id: device.id.clone(),
        })
    }

    fn gatt_disconnect(&self, device: &DeviceHandle) -> Result<(), AdapterError> {
        self.record(MockStep::GattDisconnect)?;
        self.connected.borrow_mut().remove(&device.id);
        Ok(())
    }

    fn is_gatt_connected(&self, device: &DeviceHandle) -> bool {
        self.is_linked(device)
    }

    async fn primary_services(
        &self,
        server: &GattServerHandle,
    ) -> Result<Vec<ServiceHandle>, AdapterError> {
        self.record(MockStep::PrimaryServices)?;
        self.ensure_linked(&server.device_id)?;
        Ok(self
            .services
            .borrow()
            .get(&server.device_id)
            .map(|services| services.iter().map(|s| s.handle.clone()).collect())
            .unwrap_or_default())
    }

    async fn characteristics(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicHandle>, AdapterError> {
        self.record(MockStep::Characteristics)?;
        self.ensure_linked(&service.device_id)?;
        Ok(self
            .services
            .borrow()
            .get(&service.device_id)
            .and_then(|services| services.iter().find(|s| s.handle == *service))
            .map(|s| s.characteristics.clone())
            .unwrap_or_default())
    }

    async fn start_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), AdapterError> {
        self.record(MockStep::StartNotifications)?;
        self.ensure_linked(&characteristic.device_id)
    }

    async fn stop_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), AdapterError> {
        self.record(MockStep::StopNotifications)?;
        self.ensure_linked(&characteristic.device_id)
    }

    async fn write_value(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<(), AdapterError> {
        let index = {
            let mut writes = self.writes.borrow_mut();
            writes.push(data.to_vec());
            writes.len() - 1
        };
        self.writes_in_flight.set(self.writes_in_flight.get() + 1);
        self.max_writes_in_flight
            .set(self.max_writes_in_flight.get().max(self.writes_in_flight.get()));

        let delay = self.write_delay.get();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        self.writes_in_flight.set(self.writes_in_flight.get() - 1);

        self.ensure_linked(&characteristic.device_id)?;
        if self.failing_writes.borrow().contains(&index) {
            return Err(AdapterError::Failed(format!("write {index} rejected")));
        }
        Ok(())
    }

    fn set_event_sink(&self, sink: EventSink) {
        self.sink.replace(Some(sink));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::Settings;
    use crate::utils::task::block_on_locally;

    #[test]
    fn test_serial_service_layout() {
        block_on_locally(async {
            let adapter = MockAdapter::new();
            let device = adapter.add_device("A", Some("Quad"));
            let cc2541 = Settings::default().devices[0].clone();
            adapter.add_serial_service(&device, &cc2541);

            let server = adapter.gatt_connect(&device).await.unwrap();
            let services = adapter.primary_services(&server).await.unwrap();
            assert_eq!(services.len(), 1);
            assert_eq!(services[0].uuid, cc2541.service_uuid);

            let characteristics = adapter.characteristics(&services[0]).await.unwrap();
            assert_eq!(characteristics.len(), 1);
        });
    }

    #[test]
    fn test_failures_are_one_shot() {
        block_on_locally(async {
            let adapter = MockAdapter::new();
            let device = adapter.add_device("A", None);
            adapter.fail(MockStep::GattConnect, AdapterError::Failed("nope".to_string()));

            assert!(adapter.gatt_connect(&device).await.is_err());
            assert!(!adapter.is_gatt_connected(&device));
            assert!(adapter.gatt_connect(&device).await.is_ok());
            assert_eq!(adapter.call_count(MockStep::GattConnect), 2);
        });
    }

    #[test]
    fn test_notify_recycles_buffer() {
        let adapter = MockAdapter::new();
        let device = adapter.add_device("A", None);
        let characteristic = CharacteristicHandle {
            device_id: device.id.clone(),
            instance: 9,
            uuid: Uuid::from_u128(2),
            properties: CharacteristicProperties::SERIAL,
        };
        let seen = std::rc::Rc::new(RefCell::new(Vec::new()));
        let sink_seen = seen.clone();
        adapter.set_event_sink(Box::new(move |event: AdapterEvent<'_>| {
            if let AdapterEvent::ValueChanged { value, .. } = event {
                sink_seen.borrow_mut().push(value.to_vec());
            }
        }));

        adapter.notify(&characteristic, &[1, 2, 3]);
        assert_eq!(*seen.borrow(), vec![vec![1, 2, 3]]);
        assert_eq!(*adapter.scratch.borrow(), vec![0xaa; 3]);
    }
}
