//! Device catalog lookup
//!
//! Ordered list of supported module families, matched by primary service UUID.

use uuid::Uuid;

use crate::domain::models::DeviceDescriptor;
use crate::domain::settings::Settings;

#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceCatalog {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self { devices }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.devices.clone())
    }

    /// First descriptor whose service matches.
    pub fn find_by_service(&self, service_uuid: &Uuid) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| &d.service_uuid == service_uuid)
    }

    /// Service UUIDs in catalog order, without duplicates.
    pub fn service_uuids(&self) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            if !uuids.contains(&device.service_uuid) {
                uuids.push(device.service_uuid);
            }
        }
        uuids
    }
}
