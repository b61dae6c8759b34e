//! Remap engine seam
//!
//! The grab orchestration only needs two things from the downstream engine:
//! a readiness flag gating the grab transition, and a sink for decoded key
//! events. [`Remapper`] is the built-in implementation: it applies the
//! simple modification table and injects the result through the uinput
//! virtual keyboard.

use crate::device::DeviceIdentity;
use crate::hid::{self, KeyCode};
use crate::injector::SharedVirtualDevice;
use crate::modifier::SimpleModifications;

/// Downstream consumer of decoded key events.
pub trait RemapEngine: Send + Sync {
    /// Readiness flag checked before devices are seized; while false, the
    /// grab timer keeps retrying.
    fn is_ready(&self) -> bool;

    /// Consume one decoded logical key event.
    fn handle_keyboard_event(&self, device: DeviceIdentity, key_code: KeyCode, pressed: bool);
}

/// Simple-modification remapper injecting through the virtual keyboard.
pub struct Remapper {
    modifications: SimpleModifications,
    output: SharedVirtualDevice,
}

impl Remapper {
    pub fn new(modifications: SimpleModifications, output: SharedVirtualDevice) -> Self {
        Self {
            modifications,
            output,
        }
    }
}

impl RemapEngine for Remapper {
    fn is_ready(&self) -> bool {
        // The virtual device exists for the lifetime of the remapper.
        true
    }

    fn handle_keyboard_event(&self, device: DeviceIdentity, key_code: KeyCode, pressed: bool) {
        let out_code = self.modifications.get(key_code).unwrap_or(key_code);

        tracing::trace!(
            "key event: device:{} {} -> {} pressed:{}",
            device,
            key_code,
            out_code,
            pressed
        );

        let key = match hid::evdev_from_usage(out_code.0) {
            Some(key) => key,
            None => {
                // Synthetic codes (fn modifier) and unlisted usages have no
                // injectable output.
                tracing::debug!("no injectable output for {}", out_code);
                return;
            }
        };

        let mut output = self.output.lock();
        let result = if pressed {
            output.press_key(key)
        } else {
            output.release_key(key)
        };
        if let Err(e) = result {
            tracing::warn!("Failed to inject {}: {}", out_code, e);
        }
    }
}
