//! Checksum corruption workaround
//!
//! BT-11/CC2541 based modules occasionally deliver a frame whose expected
//! checksum is `0xff` while the checksum byte carried by the frame differs.
//! Frame-integrity checkers consult [`CrcQuirk::should_bypass`] to decide
//! whether that one mismatch may be waived.

use std::cell::Cell;

use tracing::info;

use crate::domain::models::DeviceDescriptor;

/// Checksum value the affected modules corrupt.
pub const CORRUPTED_CHECKSUM: u8 = 0xff;

#[derive(Debug, Default)]
pub struct CrcQuirk {
    logged: Cell<bool>,
}

impl CrcQuirk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a checksum mismatch on this frame should be waived.
    ///
    /// Requires asymmetric evidence (`expected == 0xff`, `actual != 0xff`), a
    /// live connection and a descriptor flagged as susceptible. Never touches
    /// frame content.
    pub fn should_bypass(
        &self,
        expected: u8,
        actual: u8,
        connected: bool,
        descriptor: Option<&DeviceDescriptor>,
    ) -> bool {
        if expected != CORRUPTED_CHECKSUM || actual == CORRUPTED_CHECKSUM || !connected {
            return false;
        }

        let Some(descriptor) = descriptor.filter(|d| d.susceptible_to_crc_corruption) else {
            return false;
        };

        if !self.logged.replace(true) {
            info!(
                "Detected {} checksum corruption (0x{:02x}), skipping checksum check",
                descriptor.name, CORRUPTED_CHECKSUM
            );
        }
        true
    }

    /// Re-arm the one-shot log for the next connection.
    pub fn reset(&self) {
        self.logged.set(false);
    }

    #[cfg(test)]
    pub fn has_logged(&self) -> bool {
        self.logged.get()
    }
}
