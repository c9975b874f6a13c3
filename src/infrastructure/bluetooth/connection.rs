//! BLE Connection Module
//!
//! Runs the GATT handshake for one connection attempt: connect to the GATT
//! server, find a primary service the catalog knows, bind its write and read
//! characteristics, then start notifications. Every handle lands in the
//! attempt's [`Session`] as soon as it is obtained; the caller decides from
//! the session and the live link whether the attempt succeeded.

use std::cell::RefCell;

use tracing::{info, warn};

use crate::domain::models::{CharacteristicRole, MessageSeverity, StatusMessage};
use crate::error::{AdapterError, TransportError};
use crate::infrastructure::bluetooth::{
    adapter::{BluetoothAdapter, DeviceHandle},
    catalog::DeviceCatalog,
    events::StatusSink,
    session::{ListenerKind, Session},
};

pub struct GattNegotiator<'a> {
    adapter: &'a dyn BluetoothAdapter,
    catalog: &'a DeviceCatalog,
    session: &'a RefCell<Session>,
    status: &'a dyn StatusSink,
}

impl<'a> GattNegotiator<'a> {
    pub fn new(
        adapter: &'a dyn BluetoothAdapter,
        catalog: &'a DeviceCatalog,
        session: &'a RefCell<Session>,
        status: &'a dyn StatusSink,
    ) -> Self {
        Self {
            adapter,
            catalog,
            session,
            status,
        }
    }

    /// Run every step, stopping at the first failure.
    pub async fn negotiate(&self, device: &DeviceHandle) -> Result<(), TransportError> {
        // Step 1: GATT server
        self.gatt_connect(device).await?;
        self.send_log(
            "bluetoothConnected",
            vec![device.display_name().to_string()],
            MessageSeverity::Info,
        );

        // Step 2: primary service known to the catalog
        self.discover_service().await?;

        // Step 3: write and read characteristics
        self.bind_characteristics().await?;

        // Step 4: notifications on the read characteristic
        self.start_notifications().await
    }

    async fn gatt_connect(&self, device: &DeviceHandle) -> Result<(), TransportError> {
        info!("Connecting to GATT Server");
        let server = self
            .adapter
            .gatt_connect(device)
            .await
            .map_err(TransportError::GattConnectFailed)?;
        self.session.borrow_mut().server = Some(server);
        Ok(())
    }

    async fn discover_service(&self) -> Result<(), TransportError> {
        let server = self
            .session
            .borrow()
            .server
            .clone()
            .ok_or(TransportError::GattConnectFailed(AdapterError::NoGattServer))?;

        info!("Get primary services");
        let services = self.adapter.primary_services(&server).await?;
        info!("Found {} primary services", services.len());

        let (service, descriptor) = services
            .into_iter()
            .find_map(|service| {
                let descriptor = self.catalog.find_by_service(&service.uuid)?.clone();
                Some((service, descriptor))
            })
            .ok_or(TransportError::UnsupportedDevice)?;

        info!("Connected to service: {}", service.uuid);
        self.send_log(
            "bluetoothConnectionType",
            vec![descriptor.name.clone()],
            MessageSeverity::Info,
        );

        let mut session = self.session.borrow_mut();
        session.service = Some(service);
        session.descriptor = Some(descriptor);
        Ok(())
    }

    async fn bind_characteristics(&self) -> Result<(), TransportError> {
        let (service, descriptor) = {
            let session = self.session.borrow();
            match (session.service.clone(), session.descriptor.clone()) {
                (Some(service), Some(descriptor)) => (service, descriptor),
                _ => return Err(TransportError::UnsupportedDevice),
            }
        };

        info!("Get characteristics");
        let characteristics = self.adapter.characteristics(&service).await?;

        let mut session = self.session.borrow_mut();
        for characteristic in &characteristics {
            if characteristic.uuid == descriptor.write_characteristic {
                info!("Found write characteristic: {}", characteristic.uuid);
                session.write_characteristic = Some(characteristic.clone());
            }
            if characteristic.uuid == descriptor.read_characteristic {
                info!("Found read characteristic: {}", characteristic.uuid);
                session.read_characteristic = Some(characteristic.clone());
            }
        }

        if session.write_characteristic.is_none() {
            return Err(TransportError::MissingCharacteristic {
                role: CharacteristicRole::Write,
                expected: descriptor.write_characteristic,
            });
        }
        if session.read_characteristic.is_none() {
            return Err(TransportError::MissingCharacteristic {
                role: CharacteristicRole::Read,
                expected: descriptor.read_characteristic,
            });
        }

        session.listeners.attach(ListenerKind::ValueChanged);
        Ok(())
    }

    async fn start_notifications(&self) -> Result<(), TransportError> {
        let read = self
            .session
            .borrow()
            .read_characteristic
            .clone()
            .ok_or(TransportError::NoReadCharacteristic)?;

        if !read.properties.notify {
            warn!("Read characteristic {} cannot notify", read.uuid);
            return Err(TransportError::NotifyUnsupported);
        }

        info!("Starting notifications");
        self.adapter.start_notifications(&read).await?;
        self.session.borrow_mut().notifying = true;
        info!("Notifications started");
        Ok(())
    }

    fn send_log(&self, key: &'static str, params: Vec<String>, severity: MessageSeverity) {
        self.status.post(StatusMessage {
            key,
            params,
            severity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PortDescriptor;
    use crate::domain::settings::Settings;
    use crate::infrastructure::bluetooth::adapter::CharacteristicProperties;
    use crate::infrastructure::bluetooth::mock::{MockAdapter, MockStep};
    use crate::utils::task::block_on_locally;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn session_for(device: &DeviceHandle) -> RefCell<Session> {
        RefCell::new(Session::bind(PortDescriptor {
            path: "bluetooth_0".to_string(),
            display_name: device.display_name().to_string(),
            vendor_id: "unknown".to_string(),
            product_id: device.id.clone(),
            device: device.clone(),
        }))
    }

    #[test]
    fn test_full_handshake() {
        block_on_locally(async {
            let settings = Settings::default();
            let catalog = DeviceCatalog::from_settings(&settings);
            let adapter = MockAdapter::new();
            let device = adapter.add_device("A", Some("Quad"));
            adapter.add_serial_service(&device, &settings.devices[1]);
            let session = session_for(&device);
            let (tx, mut rx) = mpsc::unbounded_channel::<StatusMessage>();

            GattNegotiator::new(&adapter, &catalog, &session, &tx)
                .negotiate(&device)
                .await
                .unwrap();

            let session = session.borrow();
            assert!(session.is_complete());
            assert!(session.notifying);
            assert!(session.listeners.contains(ListenerKind::ValueChanged));
            assert_eq!(session.descriptor.as_ref().unwrap().name, "Nordic NRF");

            let first = rx.try_recv().unwrap();
            assert_eq!(first.key, "bluetoothConnected");
            assert_eq!(first.params, vec!["Quad".to_string()]);
            let second = rx.try_recv().unwrap();
            assert_eq!(second.key, "bluetoothConnectionType");
            assert_eq!(second.params, vec!["Nordic NRF".to_string()]);
        });
    }

    #[test]
    fn test_unknown_service_is_unsupported() {
        block_on_locally(async {
            let catalog = DeviceCatalog::from_settings(&Settings::default());
            let adapter = MockAdapter::new();
            let device = adapter.add_device("A", None);
            adapter.add_service(&device, Uuid::from_u128(0xdead), &[]);
            let session = session_for(&device);
            let (tx, _rx) = mpsc::unbounded_channel::<StatusMessage>();

            let err = GattNegotiator::new(&adapter, &catalog, &session, &tx)
                .negotiate(&device)
                .await
                .unwrap_err();

            assert_eq!(err, TransportError::UnsupportedDevice);
            assert!(session.borrow().server.is_some());
            assert!(session.borrow().service.is_none());
        });
    }

    #[test]
    fn test_missing_read_characteristic_is_named() {
        block_on_locally(async {
            let settings = Settings::default();
            let catalog = DeviceCatalog::from_settings(&settings);
            let nordic = &settings.devices[1];
            let adapter = MockAdapter::new();
            let device = adapter.add_device("A", None);
            adapter.add_service(
                &device,
                nordic.service_uuid,
                &[(nordic.write_characteristic, CharacteristicProperties::SERIAL)],
            );
            let session = session_for(&device);
            let (tx, _rx) = mpsc::unbounded_channel::<StatusMessage>();

            let err = GattNegotiator::new(&adapter, &catalog, &session, &tx)
                .negotiate(&device)
                .await
                .unwrap_err();

            assert_eq!(
                err,
                TransportError::MissingCharacteristic {
                    role: CharacteristicRole::Read,
                    expected: nordic.read_characteristic,
                }
            );
            assert!(!session.borrow().listeners.contains(ListenerKind::ValueChanged));
        });
    }

    #[test]
    fn test_read_characteristic_must_notify() {
        block_on_locally(async {
            let settings = Settings::default();
            let catalog = DeviceCatalog::from_settings(&settings);
            let nordic = &settings.devices[1];
            let adapter = MockAdapter::new();
            let device = adapter.add_device("A", None);
            let read_only = CharacteristicProperties {
                read: true,
                ..Default::default()
            };
            adapter.add_service(
                &device,
                nordic.service_uuid,
                &[
                    (nordic.write_characteristic, CharacteristicProperties::SERIAL),
                    (nordic.read_characteristic, read_only),
                ],
            );
            let session = session_for(&device);
            let (tx, _rx) = mpsc::unbounded_channel::<StatusMessage>();

            let err = GattNegotiator::new(&adapter, &catalog, &session, &tx)
                .negotiate(&device)
                .await
                .unwrap_err();

            assert_eq!(err, TransportError::NotifyUnsupported);
            assert_eq!(adapter.call_count(MockStep::StartNotifications), 0);
        });
    }

    #[test]
    fn test_gatt_connect_failure() {
        block_on_locally(async {
            let catalog = DeviceCatalog::from_settings(&Settings::default());
            let adapter = MockAdapter::new();
            let device = adapter.add_device("A", None);
            adapter.fail(MockStep::GattConnect, AdapterError::Failed("timeout".to_string()));
            let session = session_for(&device);
            let (tx, mut rx) = mpsc::unbounded_channel::<StatusMessage>();

            let err = GattNegotiator::new(&adapter, &catalog, &session, &tx)
                .negotiate(&device)
                .await
                .unwrap_err();

            assert_eq!(
                err,
                TransportError::GattConnectFailed(AdapterError::Failed("timeout".to_string()))
            );
            assert!(session.borrow().server.is_none());
            assert!(rx.try_recv().is_err());
        });
    }
}
