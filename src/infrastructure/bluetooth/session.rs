//! Per-connection state
//!
//! A [`Session`] exists from the moment `connect` binds a port until teardown
//! starts. Teardown takes the whole record out of the transport, so nothing
//! from a closed link can leak into the next one.

use crate::domain::models::{ConnectionStats, DeviceDescriptor, PortDescriptor};
use crate::infrastructure::bluetooth::adapter::{
    CharacteristicHandle, DeviceHandle, GattServerHandle, ServiceHandle,
};

/// Adapter events the transport currently reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// Attached when the attempt starts.
    GattServerDisconnected,
    /// Attached at commit.
    DeviceDisconnected,
    /// Attached once the read characteristic is bound.
    ValueChanged,
    /// Counts received bytes. Attached at commit.
    ReceiveAccounting,
}

/// Listeners are keyed by kind, so each can only ever be registered once.
/// Teardown drops them all together.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Listeners {
    attached: Vec<ListenerKind>,
}

impl Listeners {
    pub fn attach(&mut self, kind: ListenerKind) {
        if !self.contains(kind) {
            self.attached.push(kind);
        }
    }

    pub fn contains(&self, kind: ListenerKind) -> bool {
        self.attached.contains(&kind)
    }

    pub fn clear(&mut self) {
        self.attached.clear();
    }
}

#[derive(Debug, Default)]
pub struct Session {
    pub port: Option<PortDescriptor>,
    pub server: Option<GattServerHandle>,
    pub service: Option<ServiceHandle>,
    pub descriptor: Option<DeviceDescriptor>,
    pub write_characteristic: Option<CharacteristicHandle>,
    pub read_characteristic: Option<CharacteristicHandle>,
    pub notifying: bool,
    /// The adapter reported a disconnect before the handshake settled.
    pub link_lost: bool,
    pub listeners: Listeners,

    pub connection_id: Option<String>,
    pub bitrate: u32,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub failed: u32,
}

impl Session {
    pub fn bind(port: PortDescriptor) -> Self {
        Self {
            port: Some(port),
            ..Default::default()
        }
    }

    pub fn device(&self) -> Option<&DeviceHandle> {
        self.port.as_ref().map(|port| &port.device)
    }

    /// Every handle the negotiation produces is present.
    pub fn is_complete(&self) -> bool {
        self.server.is_some()
            && self.service.is_some()
            && self.descriptor.is_some()
            && self.write_characteristic.is_some()
            && self.read_characteristic.is_some()
    }

    pub fn reset_counters(&mut self) {
        self.bytes_sent = 0;
        self.bytes_received = 0;
        self.failed = 0;
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connection_id: self.connection_id.clone(),
            bitrate: self.bitrate,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            failed: self.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::adapter::CharacteristicProperties;
    use uuid::Uuid;

    fn port() -> PortDescriptor {
        let device = DeviceHandle::new("A", Some("Quad"));
        PortDescriptor {
            path: "bluetooth_0".to_string(),
            display_name: "Quad".to_string(),
            vendor_id: "unknown".to_string(),
            product_id: "A".to_string(),
            device,
        }
    }

    #[test]
    fn test_listener_attach_is_keyed() {
        let mut listeners = Listeners::default();
        listeners.attach(ListenerKind::ValueChanged);
        listeners.attach(ListenerKind::ValueChanged);
        listeners.attach(ListenerKind::ReceiveAccounting);
        assert_eq!(
            listeners,
            Listeners {
                attached: vec![ListenerKind::ValueChanged, ListenerKind::ReceiveAccounting],
            }
        );

        listeners.clear();
        assert!(!listeners.contains(ListenerKind::ValueChanged));
    }

    #[test]
    fn test_session_completeness() {
        let mut session = Session::bind(port());
        assert!(!session.is_complete());
        assert_eq!(session.device().unwrap().id, "A");

        let characteristic = CharacteristicHandle {
            device_id: "A".to_string(),
            instance: 1,
            uuid: Uuid::from_u128(2),
            properties: CharacteristicProperties::SERIAL,
        };
        session.server = Some(GattServerHandle {
            device_id: "A".to_string(),
        });
        session.service = Some(ServiceHandle {
            device_id: "A".to_string(),
            instance: 0,
            uuid: Uuid::from_u128(1),
        });
        session.write_characteristic = Some(characteristic.clone());
        session.read_characteristic = Some(characteristic);
        assert!(!session.is_complete());

        session.descriptor = Some(crate::domain::settings::Settings::default().devices[0].clone());
        assert!(session.is_complete());
    }

    #[test]
    fn test_counters_reset() {
        let mut session = Session::bind(port());
        session.bytes_sent = 10;
        session.bytes_received = 20;
        session.failed = 1;
        session.reset_counters();

        let stats = session.stats();
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.bytes_received, 0);
        assert_eq!(stats.failed, 0);
    }
}
