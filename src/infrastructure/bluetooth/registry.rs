//! Device Registry
//!
//! Keeps the ordered set of peripherals the adapter exposes and assigns each
//! one a `bluetooth_<n>` path that is never reused within a session.

use tracing::debug;

use crate::domain::models::{DeviceHandle, PortDescriptor};

const PATH_PREFIX: &str = "bluetooth_";

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    ports: Vec<PortDescriptor>,
    port_counter: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn create_port(&mut self, device: &DeviceHandle) -> PortDescriptor {
        let path = format!("{}{}", PATH_PREFIX, self.port_counter);
        self.port_counter += 1;

        PortDescriptor {
            path,
            display_name: device.display_name().to_string(),
            vendor_id: "unknown".to_string(),
            product_id: device.id.clone(),
            device: device.clone(),
        }
    }

    /// Register a device reported by the adapter. Returns the new port, or
    /// `None` if the device already has one.
    pub fn add(&mut self, device: &DeviceHandle) -> Option<PortDescriptor> {
        if self.find_by_device(device).is_some() {
            debug!("Device {} already registered", device.id);
            return None;
        }
        let port = self.create_port(device);
        self.ports.push(port.clone());
        Some(port)
    }

    /// Remove the entry bound to `device`, matched by handle identity.
    pub fn remove(&mut self, device: &DeviceHandle) -> Option<PortDescriptor> {
        let index = self
            .ports
            .iter()
            .position(|port| port.device.same_device(device))?;
        Some(self.ports.remove(index))
    }

    pub fn find_by_path(&self, path: &str) -> Option<&PortDescriptor> {
        self.ports.iter().find(|port| port.path == path)
    }

    pub fn find_by_device(&self, device: &DeviceHandle) -> Option<&PortDescriptor> {
        self.ports.iter().find(|port| port.device.same_device(device))
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_sequential() {
        let mut registry = DeviceRegistry::new();
        let a = registry.add(&DeviceHandle::new("A", Some("Alpha"))).unwrap();
        let b = registry.add(&DeviceHandle::new("B", None)).unwrap();

        assert_eq!(a.path, "bluetooth_0");
        assert_eq!(a.display_name, "Alpha");
        assert_eq!(a.vendor_id, "unknown");
        assert_eq!(a.product_id, "A");
        assert_eq!(b.path, "bluetooth_1");
        assert_eq!(b.display_name, "Unknown");
        assert_eq!(registry.ports().len(), 2);
    }

    #[test]
    fn test_duplicate_add_keeps_existing_entry() {
        let mut registry = DeviceRegistry::new();
        registry.add(&DeviceHandle::new("A", None));
        assert!(registry.add(&DeviceHandle::new("A", Some("renamed"))).is_none());
        assert_eq!(registry.ports().len(), 1);
    }

    #[test]
    fn test_paths_are_not_reused_after_removal() {
        let mut registry = DeviceRegistry::new();
        let a = DeviceHandle::new("A", None);
        registry.add(&a);

        let removed = registry.remove(&a).unwrap();
        assert_eq!(removed.path, "bluetooth_0");
        assert!(registry.find_by_path("bluetooth_0").is_none());

        let again = registry.add(&a).unwrap();
        assert_eq!(again.path, "bluetooth_1");
    }

    #[test]
    fn test_remove_unknown_device() {
        let mut registry = DeviceRegistry::new();
        registry.add(&DeviceHandle::new("A", None));
        assert!(registry.remove(&DeviceHandle::new("Z", None)).is_none());
        assert_eq!(registry.ports().len(), 1);
    }
}
