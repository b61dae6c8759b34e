//! Device registry
//!
//! Tracks currently attached keyboards by stable identity and owns their
//! handles. Each entry carries the authoritative [`CapabilityState`] for its
//! device; outside of an in-flight grab/ungrab transition every entry's
//! state matches the process-wide grabbed flag.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::device::{CapabilityState, DeviceHandle, DeviceIdentity};

/// A registered device: its handle and current capability state.
pub struct DeviceEntry {
    pub handle: Box<dyn DeviceHandle>,
    pub state: CapabilityState,
}

/// Mapping from device identity to registered device.
///
/// Also keeps a devnode index so OS removal notifications, which arrive
/// keyed by devnode, can be resolved to an identity.
pub struct DeviceRegistry {
    devices: HashMap<DeviceIdentity, DeviceEntry>,
    by_devnode: HashMap<PathBuf, DeviceIdentity>,
    /// Devices whose product/manufacturer matches this string are
    /// self-originated (our own injection device) and excluded from
    /// observe/grab transitions.
    self_name: String,
}

impl DeviceRegistry {
    pub fn new(self_name: String) -> Self {
        Self {
            devices: HashMap::new(),
            by_devnode: HashMap::new(),
            self_name,
        }
    }

    pub fn insert(&mut self, handle: Box<dyn DeviceHandle>, devnode: Option<PathBuf>) {
        let identity = handle.identity();
        if let Some(devnode) = devnode {
            self.by_devnode.insert(devnode, identity);
        }

        let metadata = handle.metadata();
        let state = if metadata.manufacturer.as_deref() == Some(self.self_name.as_str())
            || metadata.product.as_deref() == Some(self.self_name.as_str())
        {
            CapabilityState::Excluded
        } else {
            CapabilityState::Observed
        };

        self.devices.insert(identity, DeviceEntry { handle, state });
    }

    pub fn remove(&mut self, identity: DeviceIdentity) -> Option<DeviceEntry> {
        self.by_devnode.retain(|_, id| *id != identity);
        self.devices.remove(&identity)
    }

    pub fn identity_for_devnode(&self, devnode: &Path) -> Option<DeviceIdentity> {
        self.by_devnode.get(devnode).copied()
    }

    pub fn get_mut(&mut self, identity: DeviceIdentity) -> Option<&mut DeviceEntry> {
        self.devices.get_mut(&identity)
    }

    pub fn identities(&self) -> Vec<DeviceIdentity> {
        self.devices.keys().copied().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&DeviceIdentity, &DeviceEntry)> {
        self.devices.iter()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut DeviceEntry> {
        self.devices.values_mut()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.by_devnode.clear();
    }

    /// Total device-reported pressed key count across all registered devices
    pub fn total_pressed_keys(&self) -> usize {
        self.devices
            .values()
            .map(|entry| entry.handle.pressed_keys_count())
            .sum()
    }

    /// True for the synthetic loopback device used to inject remapped
    /// events; it must never be observed or grabbed.
    pub fn is_self_originated(&self, identity: DeviceIdentity) -> bool {
        self.devices
            .get(&identity)
            .map(|entry| entry.state == CapabilityState::Excluded)
            .unwrap_or(false)
    }
}
