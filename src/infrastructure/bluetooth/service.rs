//! Bluetooth Transport Module
//!
//! Serial-port-like transport over a BLE GATT link. Coordinates the device
//! registry, the connection lifecycle, the receive path and the serialized
//! write path, and publishes everything that happens as [`TransportEvent`]s.
//!
//! All state lives on one thread. Adapter events are handled synchronously
//! from the adapter's sink; work that has to outlive the handler (teardown
//! after a dropped link, the write queue) runs on `spawn_local`, so the
//! transport must be driven from inside a `tokio::task::LocalSet`.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::spawn_local;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    ConnectOptions, ConnectionInfo, ConnectionStats, DeviceDescriptor, MessageSeverity,
    PortDescriptor, SendResult, StatusMessage, TransportEvent,
};
use crate::domain::quirks::CrcQuirk;
use crate::domain::settings::{Settings, TransportSettings};
use crate::error::TransportError;
use crate::infrastructure::bluetooth::{
    adapter::{AdapterEvent, BluetoothAdapter, CharacteristicHandle, DeviceHandle, RequestDeviceOptions},
    catalog::DeviceCatalog,
    connection::GattNegotiator,
    events::{EventBus, StatusSink},
    registry::DeviceRegistry,
    session::{ListenerKind, Session},
    state::{LinkInput, LinkPhase, Step},
    writer::{SendCallback, WriteQueue, WriteSink},
};

/// BLE transport handle. Cloning shares the same transport.
#[derive(Clone)]
pub struct BleTransport {
    shared: Rc<Shared>,
}

struct Shared {
    this: Weak<Shared>,
    adapter: Rc<dyn BluetoothAdapter>,
    catalog: DeviceCatalog,
    settings: TransportSettings,
    status: Rc<dyn StatusSink>,
    supported: bool,
    events: EventBus,
    phase: Cell<LinkPhase>,
    session: RefCell<Session>,
    registry: RefCell<DeviceRegistry>,
    writer: RefCell<Option<WriteQueue>>,
    quirk: CrcQuirk,
}

impl BleTransport {
    /// Create the transport, register for adapter events and load the
    /// devices the platform already granted.
    ///
    /// Without platform support the transport stays disabled: it lists no
    /// devices, refuses to connect and rejects every write.
    pub async fn init(
        adapter: Rc<dyn BluetoothAdapter>,
        settings: &Settings,
        status: Rc<dyn StatusSink>,
    ) -> Self {
        let supported = adapter.is_supported();
        let shared = Rc::new_cyclic(|this| Shared {
            this: this.clone(),
            adapter,
            catalog: DeviceCatalog::from_settings(settings),
            settings: settings.transport.clone(),
            status,
            supported,
            events: EventBus::new(),
            phase: Cell::new(LinkPhase::Idle),
            session: RefCell::new(Session::default()),
            registry: RefCell::new(DeviceRegistry::new()),
            writer: RefCell::new(None),
            quirk: CrcQuirk::new(),
        });
        let transport = Self { shared };

        if !supported {
            error!("{}", TransportError::AdapterUnavailable);
            return transport;
        }

        let weak = Rc::downgrade(&transport.shared);
        transport
            .shared
            .adapter
            .set_event_sink(Box::new(move |event: AdapterEvent<'_>| {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_adapter_event(event);
                }
            }));

        transport.shared.load_devices().await;
        transport
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    /// Whether the platform exposes a BLE API.
    pub fn is_supported(&self) -> bool {
        self.shared.supported
    }

    /// Connect options carrying the configured default bitrate.
    pub fn default_options(&self) -> ConnectOptions {
        ConnectOptions {
            baud_rate: self.shared.settings.default_bitrate,
        }
    }

    /// Whether a radio is currently usable.
    pub async fn availability(&self) -> bool {
        if !self.shared.supported {
            return false;
        }
        let available = self.shared.adapter.availability().await;
        info!("Bluetooth available: {}", available);
        available
    }

    /// The registry in insertion order. Granted devices are enumerated once
    /// at `init`; later changes arrive only through adapter events.
    pub async fn list_known_devices(&self) -> Vec<PortDescriptor> {
        if !self.shared.supported {
            return Vec::new();
        }
        self.shared.registry.borrow().ports().to_vec()
    }

    /// Show the platform picker. An empty `services` list offers every
    /// device; otherwise only devices advertising one of them.
    pub async fn request_user_selected_device(&self, services: &[Uuid]) -> Option<PortDescriptor> {
        if !self.shared.supported {
            return None;
        }

        let options = RequestDeviceOptions {
            accept_all_devices: services.is_empty(),
            filters: services.to_vec(),
            optional_services: self.shared.catalog.service_uuids(),
        };

        match self.shared.adapter.request_device(&options).await {
            Ok(Some(device)) => {
                let port = self.shared.on_device_added(&device)?;
                info!("User selected Bluetooth device from permissions: {}", port.path);
                Some(port)
            }
            Ok(None) => {
                info!("User didn't select any Bluetooth device when requesting permission");
                None
            }
            Err(e) => {
                error!("User didn't select any Bluetooth device when requesting permission: {}", e);
                None
            }
        }
    }

    /// Open the port at `path`.
    ///
    /// Precondition failures are returned as errors. Negotiation outcomes
    /// are `Ok(true)` for a committed connection and `Ok(false)` otherwise,
    /// with a matching `Connected` event either way.
    pub async fn connect(&self, path: &str, options: ConnectOptions) -> Result<bool, TransportError> {
        let shared = &self.shared;
        if !shared.supported {
            return Err(TransportError::AdapterUnavailable);
        }

        let port = shared
            .registry
            .borrow()
            .find_by_path(path)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPort(path.to_string()))?;
        shared.advance(LinkInput::Connect)?;

        let mut session = Session::bind(port.clone());
        session.listeners.attach(ListenerKind::GattServerDisconnected);
        shared.session.replace(session);
        info!("Opening connection with ID: {}, Baud: {}", path, options.baud_rate);

        let negotiation = GattNegotiator::new(
            &*shared.adapter,
            &shared.catalog,
            &shared.session,
            &*shared.status,
        )
        .negotiate(&port.device)
        .await;
        if let Err(e) = negotiation {
            error!("Connection error: {}", e);
            shared.send_log(
                "bluetoothConnectionError",
                vec![e.to_string()],
                MessageSeverity::Error,
            );
        }

        // the live link is the single source of truth
        let link_up = shared.adapter.is_gatt_connected(&port.device);
        let complete = link_up && {
            let session = shared.session.borrow();
            session.is_complete() && !session.link_lost
        };

        match (shared.phase.get(), complete) {
            (LinkPhase::Opening, true) => {
                shared.commit(&port, options);
                Ok(true)
            }
            (LinkPhase::OpenCanceling, true) => {
                shared.abandon_open(path).await;
                Ok(false)
            }
            _ => {
                shared.fail_open(path, link_up).await;
                Ok(false)
            }
        }
    }

    /// Abandon the in-flight attempt. No-op outside an attempt.
    pub fn cancel_connect(&self) {
        match self.shared.advance(LinkInput::Cancel) {
            Ok(Some(_)) => info!("Connection attempt canceled"),
            _ => debug!("No connection attempt to cancel"),
        }
    }

    /// Close the connection. The phase change happens immediately; the
    /// returned future finishes the teardown. Calling this while a teardown
    /// is already running, or with nothing open, does nothing.
    pub fn disconnect(&self) -> impl Future<Output = ()> {
        let shared = self.shared.clone();
        let pending = shared.begin_teardown(LinkInput::Disconnect);
        async move {
            if let Some(session) = pending {
                shared.finish_teardown(session).await;
            }
        }
    }

    /// Queue `data` for writing. `callback` runs exactly once: immediately
    /// when no writable link exists, otherwise after the write finished.
    /// Awaiting the returned future is optional.
    pub fn send<F>(&self, data: &[u8], callback: F) -> impl Future<Output = ()>
    where
        F: FnOnce(SendResult) + 'static,
    {
        let pending = match self.shared.writable() {
            Ok(_) => Some(self.shared.submit_write(data.to_vec(), Box::new(callback))),
            Err(e) => {
                debug!("Rejecting write of {} bytes: {}", data.len(), e);
                callback(SendResult::failed(e));
                None
            }
        };
        async move {
            if let Some(done) = pending {
                let _ = done.await;
            }
        }
    }

    /// [`send`](Self::send) with the result as the future's output.
    pub fn write(&self, data: &[u8]) -> impl Future<Output = SendResult> {
        let (tx, rx) = oneshot::channel();
        let sent = self.send(data, move |result| {
            let _ = tx.send(result);
        });
        async move {
            sent.await;
            rx.await
                .unwrap_or_else(|_| SendResult::failed(TransportError::LinkDown))
        }
    }

    /// Whether a checksum mismatch on a received frame should be waived for
    /// the connected module.
    pub fn should_bypass_integrity_check(&self, expected: u8, actual: u8) -> bool {
        let session = self.shared.session.borrow();
        self.shared.quirk.should_bypass(
            expected,
            actual,
            self.is_connected(),
            session.descriptor.as_ref(),
        )
    }

    pub fn is_connected(&self) -> bool {
        self.shared.phase.get().is_connected()
    }

    pub fn phase(&self) -> LinkPhase {
        self.shared.phase.get()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared.session.borrow().stats()
    }

    pub fn connected_port(&self) -> Option<PortDescriptor> {
        if !self.is_connected() {
            return None;
        }
        self.shared.session.borrow().port.clone()
    }

    /// Catalog entry of the current connection.
    pub fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.shared.session.borrow().descriptor.clone()
    }

    /// Feed an adapter event by hand, for glue that does not use the sink.
    pub fn handle_adapter_event(&self, event: AdapterEvent<'_>) {
        self.shared.handle_adapter_event(event);
    }
}

impl Shared {
    fn advance(&self, input: LinkInput) -> Result<Option<LinkPhase>, TransportError> {
        let current = self.phase.get();
        match current.on(input) {
            Step::Enter(next) => {
                debug!("Link {} -> {} on {:?}", current, next, input);
                self.phase.set(next);
                Ok(Some(next))
            }
            Step::Ignore => Ok(None),
            Step::Reject(e) => {
                warn!("Rejected {:?} while {}: {}", input, current, e);
                Err(e)
            }
        }
    }

    async fn load_devices(&self) {
        match self.adapter.known_devices().await {
            Ok(devices) => {
                let mut registry = self.registry.borrow_mut();
                for device in &devices {
                    registry.add(device);
                }
                info!("Loaded {} Bluetooth devices", devices.len());
            }
            Err(e) => error!("Failed to load Bluetooth devices: {}", e),
        }
    }

    fn commit(&self, port: &PortDescriptor, options: ConnectOptions) {
        let _ = self.advance(LinkInput::Settled { complete: true });

        let info = {
            let mut session = self.session.borrow_mut();
            session.connection_id = Some(port.path.clone());
            session.bitrate = options.baud_rate;
            session.reset_counters();
            session.listeners.attach(ListenerKind::DeviceDisconnected);
            session.listeners.attach(ListenerKind::ReceiveAccounting);

            ConnectionInfo {
                connection_id: port.path.clone(),
                bitrate: options.baud_rate,
                device_name: port.display_name.clone(),
                descriptor_name: session
                    .descriptor
                    .as_ref()
                    .map(|d| d.name.clone())
                    .unwrap_or_default(),
            }
        };
        self.quirk.reset();

        info!(
            "Connection opened with ID: {}, Baud: {}",
            info.connection_id, info.bitrate
        );
        self.events.emit(TransportEvent::Connected(Some(info)));
    }

    /// The attempt succeeded after the caller canceled it. Give the module
    /// time to settle, then close it again.
    async fn abandon_open(&self, path: &str) {
        let settle = self.settle_delay();
        info!(
            "Connection opened with ID: {}, but request was canceled, disconnecting in {:?}",
            path, settle
        );
        tokio::time::sleep(settle).await;

        if let Some(session) = self.begin_teardown(LinkInput::Teardown) {
            self.finish_teardown(session).await;
        }
        self.events.emit(TransportEvent::Connected(None));
    }

    async fn fail_open(&self, path: &str, link_up: bool) {
        let session = self.session.take();
        if link_up {
            if let Err(e) = self.release_link(&session).await {
                warn!("Failed to close incomplete link {}: {}", path, e);
            }
        }

        if self.phase.get() == LinkPhase::OpenCanceling {
            info!("Connection didn't open and request was canceled: {}", path);
        } else {
            info!("Failed to open bluetooth port {}", path);
        }
        let _ = self.advance(LinkInput::Settled { complete: false });
        self.events.emit(TransportEvent::Connected(None));
    }

    fn settle_delay(&self) -> Duration {
        let ms = self
            .session
            .borrow()
            .descriptor
            .as_ref()
            .and_then(|d| d.teardown_settle_ms)
            .unwrap_or(self.settings.teardown_settle_ms);
        Duration::from_millis(ms)
    }

    /// Synchronous half of a teardown: enter `Closing` and take the session
    /// out, which zeroes the live counters and detaches every listener.
    fn begin_teardown(&self, input: LinkInput) -> Option<Session> {
        match self.advance(input) {
            Ok(Some(LinkPhase::Closing)) => {}
            Ok(Some(LinkPhase::OpenCanceling)) => {
                info!("Disconnect requested during connection attempt, canceling it");
                return None;
            }
            _ => return None,
        }

        let mut session = self.session.take();
        session.listeners.clear();
        self.quirk.reset();
        Some(session)
    }

    async fn finish_teardown(&self, session: Session) {
        let path = session
            .port
            .as_ref()
            .map(|port| port.path.clone())
            .unwrap_or_default();
        let result = self.release_link(&session).await;
        let _ = self.advance(LinkInput::TeardownFinished);

        match result {
            Ok(()) => {
                info!(
                    "Connection with ID: {} closed, Sent: {} bytes, Received: {} bytes",
                    path, session.bytes_sent, session.bytes_received
                );
                self.events.emit(TransportEvent::Disconnected(true));
            }
            Err(e) => {
                error!("Failed to close connection with ID: {}: {}", path, e);
                self.events.emit(TransportEvent::Disconnected(false));
            }
        }
    }

    /// Stop notifications and drop the GATT link if it is still up. The link
    /// is dropped even when stopping notifications failed; the first error
    /// is reported.
    async fn release_link(&self, session: &Session) -> Result<(), TransportError> {
        let Some(device) = session.device() else {
            return Ok(());
        };

        let mut result = Ok(());
        if session.notifying && self.adapter.is_gatt_connected(device) {
            if let Some(read) = &session.read_characteristic {
                result = self
                    .adapter
                    .stop_notifications(read)
                    .await
                    .map_err(TransportError::TeardownFailed);
            }
        }

        if self.adapter.is_gatt_connected(device) {
            let disconnected = self
                .adapter
                .gatt_disconnect(device)
                .map_err(TransportError::TeardownFailed);
            result = result.and(disconnected);
        }
        result
    }

    fn send_log(&self, key: &'static str, params: Vec<String>, severity: MessageSeverity) {
        self.status.post(StatusMessage {
            key,
            params,
            severity,
        });
    }

    fn handle_adapter_event(&self, event: AdapterEvent<'_>) {
        match event {
            AdapterEvent::DeviceConnected(device) => {
                self.on_device_added(device);
            }
            AdapterEvent::DeviceDisconnected(device) => {
                self.on_device_removed(device);
                self.on_link_event(device, ListenerKind::DeviceDisconnected);
            }
            AdapterEvent::GattServerDisconnected(device) => {
                self.on_device_removed(device);
                self.on_link_event(device, ListenerKind::GattServerDisconnected);
            }
            AdapterEvent::ValueChanged {
                characteristic,
                value,
            } => self.on_notification(characteristic, value),
        }
    }

    /// Register `device`, announcing it if it is new. Returns its port.
    fn on_device_added(&self, device: &DeviceHandle) -> Option<PortDescriptor> {
        let added = self.registry.borrow_mut().add(device);
        match added {
            Some(port) => {
                info!("Bluetooth device {} added as {}", port.display_name, port.path);
                self.events.emit(TransportEvent::DeviceAdded(port.clone()));
                Some(port)
            }
            None => self.registry.borrow().find_by_device(device).cloned(),
        }
    }

    fn on_device_removed(&self, device: &DeviceHandle) {
        let removed = self.registry.borrow_mut().remove(device);
        match &removed {
            Some(port) => info!("Bluetooth device {} removed", port.path),
            None => debug!("Unregistered Bluetooth device {} removed", device.id),
        }
        self.events.emit(TransportEvent::DeviceRemoved(removed));
    }

    fn on_link_event(&self, device: &DeviceHandle, kind: ListenerKind) {
        let bound = {
            let session = self.session.borrow();
            session.listeners.contains(kind)
                && session.device().is_some_and(|d| d.same_device(device))
        };
        if !bound {
            return;
        }

        match self.phase.get() {
            LinkPhase::Opening | LinkPhase::OpenCanceling => {
                warn!(
                    "Device {} disconnected during connection handshake",
                    device.display_name()
                );
                self.session.borrow_mut().link_lost = true;
            }
            LinkPhase::OpenCommitted => {
                warn!("Device {} disconnected", device.display_name());
                let Some(session) = self.begin_teardown(LinkInput::Disconnect) else {
                    return;
                };
                let Some(shared) = self.this.upgrade() else {
                    return;
                };
                spawn_local(async move { shared.finish_teardown(session).await });
            }
            LinkPhase::Idle | LinkPhase::Closing => {}
        }
    }

    fn on_notification(&self, characteristic: &CharacteristicHandle, value: &[u8]) {
        {
            let mut session = self.session.borrow_mut();
            if !session.listeners.contains(ListenerKind::ValueChanged)
                || session.read_characteristic.as_ref() != Some(characteristic)
            {
                return;
            }
            if session.listeners.contains(ListenerKind::ReceiveAccounting) {
                session.bytes_received += value.len() as u64;
            }
        }
        // the adapter may recycle `value` once we return
        self.events.emit(TransportEvent::Received(value.to_vec()));
    }

    /// Write characteristic of a live link.
    fn writable(&self) -> Result<CharacteristicHandle, TransportError> {
        let session = self.session.borrow();
        let characteristic = session
            .write_characteristic
            .as_ref()
            .filter(|c| c.properties.can_write())
            .ok_or(TransportError::NoWriteCharacteristic)?;
        let device = session.device().ok_or(TransportError::LinkDown)?;
        if !self.adapter.is_gatt_connected(device) {
            return Err(TransportError::LinkDown);
        }
        Ok(characteristic.clone())
    }

    fn submit_write(&self, data: Vec<u8>, callback: SendCallback) -> oneshot::Receiver<()> {
        let mut writer = self.writer.borrow_mut();
        let queue = writer.get_or_insert_with(|| WriteQueue::start(self.this.clone()));
        queue.submit(data, callback)
    }
}

#[async_trait(?Send)]
impl WriteSink for Shared {
    async fn write_frame(&self, data: &[u8]) -> SendResult {
        let characteristic = match self.writable() {
            Ok(characteristic) => characteristic,
            Err(e) => {
                warn!("Dropping queued write of {} bytes: {}", data.len(), e);
                return SendResult::failed(e);
            }
        };

        let result = self.adapter.write_value(&characteristic, data).await;

        let mut session = self.session.borrow_mut();
        let same_link = session.write_characteristic.as_ref() == Some(&characteristic);
        match result {
            Ok(()) => {
                if same_link {
                    session.bytes_sent += data.len() as u64;
                }
                SendResult::sent(data.len())
            }
            Err(e) => {
                error!("Failed to send data: {}", e);
                if same_link {
                    session.failed += 1;
                }
                SendResult::failed(TransportError::WriteFailed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::events::TracingStatusSink;
    use crate::infrastructure::bluetooth::mock::MockAdapter;
    use crate::utils::task::block_on_locally;

    #[test]
    fn test_disconnect_rearms_checksum_quirk_log() {
        block_on_locally(async {
            let settings = Settings::default();
            let adapter = MockAdapter::new();
            let device = adapter.add_device("Q", Some("HM-10"));
            adapter.add_serial_service(&device, &settings.devices[0]);
            let transport =
                BleTransport::init(Rc::new(adapter), &settings, Rc::new(TracingStatusSink)).await;
            let options = ConnectOptions::default();

            assert_eq!(transport.connect("bluetooth_0", options).await, Ok(true));
            assert!(transport.should_bypass_integrity_check(0xff, 0x12));
            assert!(transport.shared.quirk.has_logged());

            transport.disconnect().await;
            assert!(!transport.shared.quirk.has_logged());

            assert_eq!(transport.connect("bluetooth_0", options).await, Ok(true));
            assert!(!transport.shared.quirk.has_logged());
            assert!(transport.should_bypass_integrity_check(0xff, 0x12));
            assert!(transport.shared.quirk.has_logged());
        });
    }
}
