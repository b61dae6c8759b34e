//! Modifier flag tracking and the simple modification table

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hid::KeyCode;

/// Currently-asserted modifier keys, independent of any single device.
///
/// Reset at every grab-completion and ungrab-completion boundary so no
/// modifier state survives a capability transition.
#[derive(Debug, Default)]
pub struct ModifierFlagTracker {
    asserted: HashSet<KeyCode>,
}

impl ModifierFlagTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a press/release of a modifier key. Non-modifier codes are
    /// ignored.
    pub fn update(&mut self, key_code: KeyCode, pressed: bool) {
        if !key_code.is_modifier() {
            return;
        }
        if pressed {
            self.asserted.insert(key_code);
        } else {
            self.asserted.remove(&key_code);
        }
    }

    pub fn is_asserted(&self, key_code: KeyCode) -> bool {
        self.asserted.contains(&key_code)
    }

    pub fn is_empty(&self) -> bool {
        self.asserted.is_empty()
    }

    /// Clear all asserted modifiers.
    pub fn reset(&mut self) {
        self.asserted.clear();
    }
}

/// Physical-key to physical-key substitution table.
///
/// Mutated from the configuration-reload path and read from the per-event
/// path, which may run on different threads; the table therefore carries
/// its own lock, independent of the orchestration loop's serialization.
#[derive(Debug, Clone, Default)]
pub struct SimpleModifications {
    inner: Arc<Mutex<HashMap<KeyCode, KeyCode>>>,
}

impl SimpleModifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn set(&self, from: KeyCode, to: KeyCode) {
        self.inner.lock().insert(from, to);
    }

    pub fn get(&self, from: KeyCode) -> Option<KeyCode> {
        self.inner.lock().get(&from).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_ignores_non_modifiers() {
        let mut tracker = ModifierFlagTracker::new();
        tracker.update(KeyCode(0x04), true);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_tracker_assert_release() {
        let mut tracker = ModifierFlagTracker::new();
        tracker.update(KeyCode(0xe1), true);
        assert!(tracker.is_asserted(KeyCode(0xe1)));

        tracker.update(KeyCode(0xe1), false);
        assert!(!tracker.is_asserted(KeyCode(0xe1)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_tracker_tracks_fn_modifier() {
        let mut tracker = ModifierFlagTracker::new();
        tracker.update(KeyCode::FN_MODIFIER, true);
        assert!(tracker.is_asserted(KeyCode::FN_MODIFIER));
    }

    #[test]
    fn test_tracker_reset() {
        let mut tracker = ModifierFlagTracker::new();
        tracker.update(KeyCode(0xe0), true);
        tracker.update(KeyCode(0xe5), true);
        tracker.reset();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_modifications_set_and_get() {
        let table = SimpleModifications::new();
        table.set(KeyCode(0x39), KeyCode(0x29));
        assert_eq!(table.get(KeyCode(0x39)), Some(KeyCode(0x29)));
        assert_eq!(table.get(KeyCode(0x04)), None);
    }

    #[test]
    fn test_modifications_overwrite() {
        let table = SimpleModifications::new();
        table.set(KeyCode(0x39), KeyCode(0x29));
        table.set(KeyCode(0x39), KeyCode(0xe0));
        assert_eq!(table.get(KeyCode(0x39)), Some(KeyCode(0xe0)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_modifications_clear() {
        let table = SimpleModifications::new();
        table.set(KeyCode(0x39), KeyCode(0x29));
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_modifications_shared_between_clones() {
        let table = SimpleModifications::new();
        let clone = table.clone();
        table.set(KeyCode(0x39), KeyCode(0x29));
        assert_eq!(clone.get(KeyCode(0x39)), Some(KeyCode(0x29)));
    }
}
