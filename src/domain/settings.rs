use crate::domain::models::DeviceDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// Transport tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Delay before tearing down a connection whose attempt was canceled after
    /// the link came up. Some dongles misbehave when closed right after opening.
    #[serde(default = "default_teardown_settle_ms")]
    pub teardown_settle_ms: u64,
    #[serde(default = "default_bitrate")]
    pub default_bitrate: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            teardown_settle_ms: default_teardown_settle_ms(),
            default_bitrate: default_bitrate(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_serial_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_teardown_settle_ms() -> u64 {
    150
}
fn default_bitrate() -> u32 {
    115_200
}

const fn ble_uuid(short: u32) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_1000_8000_0080_5f9b_34fb)
}

const NORDIC_UART_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
const NORDIC_UART_RX: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
const NORDIC_UART_TX: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

fn default_devices() -> Vec<DeviceDescriptor> {
    vec![
        DeviceDescriptor {
            name: "CC2541".to_string(),
            service_uuid: ble_uuid(0xffe0),
            write_characteristic: ble_uuid(0xffe1),
            read_characteristic: ble_uuid(0xffe1),
            // BT-11 modules mangle a 0xff checksum byte
            susceptible_to_crc_corruption: true,
            teardown_settle_ms: None,
        },
        DeviceDescriptor {
            name: "Nordic NRF".to_string(),
            service_uuid: NORDIC_UART_SERVICE,
            write_characteristic: NORDIC_UART_RX,
            read_characteristic: NORDIC_UART_TX,
            susceptible_to_crc_corruption: false,
            teardown_settle_ms: None,
        },
        DeviceDescriptor {
            name: "SpeedyBee Type 1".to_string(),
            service_uuid: ble_uuid(0x1000),
            write_characteristic: ble_uuid(0x1001),
            read_characteristic: ble_uuid(0x1002),
            susceptible_to_crc_corruption: false,
            teardown_settle_ms: None,
        },
        DeviceDescriptor {
            name: "SpeedyBee Type 2".to_string(),
            service_uuid: ble_uuid(0xabf0),
            write_characteristic: ble_uuid(0xabf1),
            read_characteristic: ble_uuid(0xabf2),
            susceptible_to_crc_corruption: false,
            teardown_settle_ms: None,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub transport: TransportSettings,

    // Known BLE serial module families, matched by service UUID
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceDescriptor>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            transport: TransportSettings::default(),
            devices: default_devices(),
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::open(settings_path))
    }

    /// Load settings from an explicit file, falling back to defaults when the
    /// file is missing or unreadable.
    pub fn open(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleSerialLink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn add_device(&mut self, descriptor: DeviceDescriptor) -> anyhow::Result<()> {
        if !self
            .settings
            .devices
            .iter()
            .any(|d| d.service_uuid == descriptor.service_uuid)
        {
            self.settings.devices.push(descriptor);
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.transport.teardown_settle_ms, 150);
        assert_eq!(settings.transport.default_bitrate, 115_200);
        assert_eq!(settings.log_settings.level, "info");

        let cc2541 = &settings.devices[0];
        assert_eq!(
            cc2541.service_uuid.to_string(),
            "0000ffe0-0000-1000-8000-00805f9b34fb"
        );
        assert!(cc2541.susceptible_to_crc_corruption);
        assert!(settings.devices[1..]
            .iter()
            .all(|d| !d.susceptible_to_crc_corruption));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "transport": { "teardown_settle_ms": 400 } }"#).unwrap();
        assert_eq!(settings.transport.teardown_settle_ms, 400);
        assert_eq!(settings.transport.default_bitrate, 115_200);
        assert_eq!(settings.devices.len(), default_devices().len());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::open(dir.path().join("settings.json"));
        assert_eq!(service.get().devices, default_devices());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::open(&path);
        service.get_mut().transport.teardown_settle_ms = 250;
        service
            .add_device(DeviceDescriptor {
                name: "Custom".to_string(),
                service_uuid: ble_uuid(0xfff0),
                write_characteristic: ble_uuid(0xfff1),
                read_characteristic: ble_uuid(0xfff2),
                susceptible_to_crc_corruption: false,
                teardown_settle_ms: Some(300),
            })
            .unwrap();

        let reloaded = SettingsService::open(&path);
        assert_eq!(reloaded.get().transport.teardown_settle_ms, 250);
        let custom = reloaded.get().devices.last().unwrap();
        assert_eq!(custom.name, "Custom");
        assert_eq!(custom.teardown_settle_ms, Some(300));
    }

    #[test]
    fn test_add_device_ignores_duplicate_service() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = SettingsService::open(dir.path().join("settings.json"));
        let before = service.get().devices.len();

        let duplicate = service.get().devices[0].clone();
        service.add_device(duplicate).unwrap();

        assert_eq!(service.get().devices.len(), before);
        assert!(!service.path().exists());
    }
}
