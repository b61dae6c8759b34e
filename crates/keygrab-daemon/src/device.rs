//! Per-device handles
//!
//! [`DeviceHandle`] is the seam between the grab orchestration and the OS:
//! it performs the actual seize/release, LED writes, and raw event decoding
//! for one physical device. [`EvdevHandle`] is the evdev-backed
//! implementation; tests substitute mock handles.
//!
//! Observation and exclusive grab are mutually exclusive on a handle: each
//! starts its own reader task and stopping one is required before starting
//! the other. Dropping the reader's device file descriptor releases the
//! kernel grab.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use evdev::{Device, EventType, InputEvent, InputEventKind, LedType};
use parking_lot::Mutex;

use crate::hid::{self, usage_page, LedState};

/// Stable identity for an attached device.
///
/// Assigned monotonically at handle creation; used as the registry map key
/// and never reused while the device remains attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity(pub u64);

impl DeviceIdentity {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        DeviceIdentity(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Informational device metadata; every field is optional.
#[derive(Debug, Clone, Default)]
pub struct DeviceMetadata {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub vendor_id: Option<u32>,
    pub product_id: Option<u32>,
    pub location: Option<String>,
    pub serial_number: Option<String>,
}

/// Capability state of a registered device.
///
/// A single authoritative value per registry entry; a device is never in
/// both modes at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityState {
    /// Non-exclusive monitoring; input still reaches the OS normally
    Observed,
    /// Exclusive seize; input reaches only the event router
    Grabbed,
    /// Tracked but exempt from both modes (the injection device itself)
    Excluded,
}

/// Callback invoked with decoded raw input:
/// `(identity, usage page, usage, raw integer value)`.
pub type ValueCallback = Arc<dyn Fn(DeviceIdentity, u32, u32, i64) + Send + Sync>;

/// Low-level per-device operations consumed by the grab orchestration.
///
/// All calls are expected to be fast and non-blocking; none of them may
/// stall the orchestration loop.
pub trait DeviceHandle: Send {
    fn identity(&self) -> DeviceIdentity;
    fn metadata(&self) -> &DeviceMetadata;

    /// Start non-exclusive monitoring, feeding decoded events to `callback`.
    fn observe(&mut self, callback: ValueCallback);
    /// Stop non-exclusive monitoring.
    fn unobserve(&mut self);
    /// Seize the device exclusively, feeding decoded events to `callback`.
    fn grab(&mut self, callback: ValueCallback) -> Result<()>;
    /// Release the exclusive seize.
    fn ungrab(&mut self) -> Result<()>;

    fn set_caps_lock_led_state(&mut self, state: LedState);
    fn pressed_keys_count(&self) -> usize;
    fn clear_changed_keys(&mut self);
    fn clear_pressed_keys(&mut self);
}

#[derive(Default)]
struct KeyBuffers {
    pressed: HashSet<u16>,
    changed: HashSet<u16>,
}

/// evdev-backed device handle.
///
/// Keeps a separate query file descriptor for LED writes and state reads;
/// observe/grab each open the devnode again for the reader task so the
/// reader owns its descriptor outright.
pub struct EvdevHandle {
    identity: DeviceIdentity,
    devnode: PathBuf,
    metadata: DeviceMetadata,
    query: Device,
    buffers: Arc<Mutex<KeyBuffers>>,
    reader: Option<tokio::task::JoinHandle<()>>,
}

impl EvdevHandle {
    /// Open a handle for the device at `devnode`.
    pub fn open(devnode: &Path) -> Result<Self> {
        let query = Device::open(devnode)
            .with_context(|| format!("Failed to open device at {}", devnode.display()))?;

        let id = query.input_id();
        let metadata = DeviceMetadata {
            manufacturer: None,
            product: query.name().map(str::to_string),
            vendor_id: Some(id.vendor() as u32),
            product_id: Some(id.product() as u32),
            location: query.physical_path().map(str::to_string),
            serial_number: query.unique_name().map(str::to_string),
        };

        Ok(Self {
            identity: DeviceIdentity::next(),
            devnode: devnode.to_path_buf(),
            metadata,
            query,
            buffers: Arc::new(Mutex::new(KeyBuffers::default())),
            reader: None,
        })
    }

    pub fn devnode(&self) -> &Path {
        &self.devnode
    }

    /// Whether the underlying device reports keyboard capabilities
    pub fn is_keyboard(&self) -> bool {
        is_keyboard(&self.query)
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn spawn_reader(&mut self, device: Device, callback: ValueCallback) {
        // Keys already held down when the reader starts produce no press
        // event; without seeding they would be invisible to the pressed set
        // until released.
        match device.get_key_state() {
            Ok(keys) => {
                seed_pressed_keys(&self.buffers, keys.iter().map(|key| key.code()));
            }
            Err(e) => {
                tracing::debug!(
                    "Could not read key state for {}: {}",
                    self.devnode.display(),
                    e
                );
            }
        }

        let identity = self.identity;
        let buffers = Arc::clone(&self.buffers);
        let devnode = self.devnode.clone();

        self.reader = Some(tokio::spawn(async move {
            let mut stream = match device.into_event_stream() {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(
                        "Failed to create event stream for {}: {}",
                        devnode.display(),
                        e
                    );
                    return;
                }
            };

            loop {
                let event = match stream.next_event().await {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::debug!("Event stream for {} ended: {}", devnode.display(), e);
                        break;
                    }
                };

                if let InputEventKind::Key(key) = event.kind() {
                    let value = event.value();
                    {
                        let mut buffers = buffers.lock();
                        match value {
                            1 => {
                                buffers.pressed.insert(key.code());
                                buffers.changed.insert(key.code());
                            }
                            0 => {
                                buffers.pressed.remove(&key.code());
                                buffers.changed.insert(key.code());
                            }
                            // autorepeat; key is already in the pressed set
                            _ => {}
                        }
                    }

                    if let Some(usage) = hid::usage_from_evdev(key) {
                        callback(
                            identity,
                            usage_page::KEYBOARD_OR_KEYPAD,
                            usage,
                            value as i64,
                        );
                    }
                }
            }
        }));
    }
}

impl DeviceHandle for EvdevHandle {
    fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    fn metadata(&self) -> &DeviceMetadata {
        &self.metadata
    }

    fn observe(&mut self, callback: ValueCallback) {
        self.stop_reader();

        match Device::open(&self.devnode) {
            Ok(device) => self.spawn_reader(device, callback),
            Err(e) => {
                tracing::warn!(
                    "Failed to open {} for observation: {}",
                    self.devnode.display(),
                    e
                );
            }
        }
    }

    fn unobserve(&mut self) {
        self.stop_reader();
    }

    fn grab(&mut self, callback: ValueCallback) -> Result<()> {
        self.stop_reader();

        let mut device = Device::open(&self.devnode)
            .with_context(|| format!("Failed to open {} for grab", self.devnode.display()))?;
        device.grab().with_context(|| {
            format!(
                "Failed to grab {} for exclusive access",
                self.devnode.display()
            )
        })?;

        self.spawn_reader(device, callback);
        Ok(())
    }

    fn ungrab(&mut self) -> Result<()> {
        // The grabbed descriptor lives inside the reader task; aborting it
        // drops the descriptor, which releases the kernel grab.
        self.stop_reader();
        Ok(())
    }

    fn set_caps_lock_led_state(&mut self, state: LedState) {
        let value = match state {
            LedState::On => 1,
            LedState::Off => 0,
        };
        let event = InputEvent::new(EventType::LED, LedType::LED_CAPSL.0, value);
        if let Err(e) = self.query.send_events(&[event]) {
            tracing::debug!(
                "Failed to set caps lock LED on {}: {}",
                self.devnode.display(),
                e
            );
        }
    }

    fn pressed_keys_count(&self) -> usize {
        self.buffers.lock().pressed.len()
    }

    fn clear_changed_keys(&mut self) {
        self.buffers.lock().changed.clear();
    }

    fn clear_pressed_keys(&mut self) {
        self.buffers.lock().pressed.clear();
    }
}

impl Drop for EvdevHandle {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Mark keys the kernel reports as currently down as pressed.
fn seed_pressed_keys(buffers: &Mutex<KeyBuffers>, held: impl Iterator<Item = u16>) {
    let mut buffers = buffers.lock();
    for code in held {
        buffers.pressed.insert(code);
    }
}

/// Check if a device looks like a keyboard
pub fn is_keyboard(device: &Device) -> bool {
    device.supported_events().contains(EventType::KEY)
        && device
            .supported_keys()
            .map(|keys| keys.contains(evdev::Key::KEY_A))
            .unwrap_or(false)
}

/// Enumerate devnodes of currently attached keyboards
pub fn enumerate_keyboards() -> Vec<PathBuf> {
    let mut keyboards = Vec::new();

    let entries = match std::fs::read_dir("/dev/input") {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Could not read /dev/input: {}", e);
            return keyboards;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                if is_keyboard(&device) {
                    keyboards.push(path);
                }
            }
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    keyboards
}
