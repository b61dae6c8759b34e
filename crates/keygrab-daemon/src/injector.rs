//! Virtual device injection via uinput
//!
//! Provides the virtual keyboard through which remapped events re-enter the
//! input stack. The device is shared behind a lock because events for it may
//! originate from any grabbed device.

use std::sync::Arc;

use anyhow::Result;
use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, InputEvent, Key};
use parking_lot::Mutex;

/// A shared virtual device usable from multiple event handlers.
pub type SharedVirtualDevice = Arc<Mutex<VirtualDevice>>;

/// Create a shared virtual keyboard device for output injection.
///
/// The name doubles as the self-origination marker: input devices carrying
/// it are never grabbed or observed.
///
/// # Errors
///
/// Returns an error if the virtual device cannot be created (e.g.
/// insufficient permissions on /dev/uinput).
pub fn create_shared_virtual_device(name: &str) -> Result<SharedVirtualDevice> {
    let device = VirtualDevice::new_keyboard(name)?;
    Ok(Arc::new(Mutex::new(device)))
}

/// A virtual input device for injecting events
pub struct VirtualDevice {
    device: evdev::uinput::VirtualDevice,
}

impl VirtualDevice {
    /// Create a new virtual keyboard device
    pub fn new_keyboard(name: &str) -> Result<Self> {
        let mut keys = AttributeSet::<Key>::new();

        // Add all standard keys
        for code in 0..256u16 {
            keys.insert(Key::new(code));
        }

        let device = VirtualDeviceBuilder::new()?
            .name(name)
            .with_keys(&keys)?
            .build()?;

        Ok(Self { device })
    }

    /// Emit an input event
    pub fn emit(&mut self, events: &[InputEvent]) -> Result<()> {
        self.device.emit(events)?;
        Ok(())
    }

    /// Send a key press event
    pub fn press_key(&mut self, key: Key) -> Result<()> {
        let press = InputEvent::new(evdev::EventType::KEY, key.code(), 1);
        let syn = InputEvent::new(evdev::EventType::SYNCHRONIZATION, 0, 0);
        self.emit(&[press, syn])?;
        Ok(())
    }

    /// Send a key release event
    pub fn release_key(&mut self, key: Key) -> Result<()> {
        let release = InputEvent::new(evdev::EventType::KEY, key.code(), 0);
        let syn = InputEvent::new(evdev::EventType::SYNCHRONIZATION, 0, 0);
        self.emit(&[release, syn])?;
        Ok(())
    }
}
