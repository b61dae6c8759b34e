//! System caps-lock facility
//!
//! Queries and forces the machine-wide caps lock state. The Linux
//! implementation goes through the kernel LED class; errors are absorbed
//! and logged since caps lock sync is best-effort.

use std::path::PathBuf;

pub trait SystemCapsLock: Send {
    /// Current caps lock state, if it can be determined.
    fn caps_lock_state(&self) -> Option<bool>;
    /// Force the caps lock state.
    fn set_caps_lock_state(&mut self, state: bool);
}

/// Caps lock via `/sys/class/leds/*::capslock/brightness`.
pub struct LedCapsLock {
    led_paths: Vec<PathBuf>,
}

impl LedCapsLock {
    /// Discover caps lock LED devices. An empty result is not an error; the
    /// facility then reports no state and setting becomes a no-op.
    pub fn discover() -> Self {
        let mut led_paths = Vec::new();

        if let Ok(entries) = std::fs::read_dir("/sys/class/leds") {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.ends_with("::capslock") {
                    led_paths.push(entry.path().join("brightness"));
                }
            }
        }

        if led_paths.is_empty() {
            tracing::debug!("No caps lock LED devices found under /sys/class/leds");
        }

        Self { led_paths }
    }

    #[cfg(test)]
    fn with_paths(led_paths: Vec<PathBuf>) -> Self {
        Self { led_paths }
    }
}

impl SystemCapsLock for LedCapsLock {
    fn caps_lock_state(&self) -> Option<bool> {
        let path = self.led_paths.first()?;
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().parse::<u32>().ok().map(|v| v != 0),
            Err(e) => {
                tracing::debug!("Could not read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn set_caps_lock_state(&mut self, state: bool) {
        let value = if state { "1" } else { "0" };
        for path in &self.led_paths {
            if let Err(e) = std::fs::write(path, value) {
                tracing::debug!("Could not write {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_leds_reports_no_state() {
        let caps = LedCapsLock::with_paths(Vec::new());
        assert_eq!(caps.caps_lock_state(), None);
    }

    #[test]
    fn test_read_and_write_brightness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brightness");
        std::fs::write(&path, "1\n").unwrap();

        let mut caps = LedCapsLock::with_paths(vec![path.clone()]);
        assert_eq!(caps.caps_lock_state(), Some(true));

        caps.set_caps_lock_state(false);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
        assert_eq!(caps.caps_lock_state(), Some(false));
    }

    #[test]
    fn test_missing_file_is_absorbed() {
        let mut caps = LedCapsLock::with_paths(vec![PathBuf::from("/nonexistent/brightness")]);
        assert_eq!(caps.caps_lock_state(), None);
        caps.set_caps_lock_state(true);
    }
}
