//! Shared test doubles for the orchestration modules.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;

use crate::caps_lock::SystemCapsLock;
use crate::device::{DeviceHandle, DeviceIdentity, DeviceMetadata, ValueCallback};
use crate::engine::RemapEngine;
use crate::hid::{KeyCode, LedState};
use crate::session::SessionClient;

/// Observable call record of a [`MockHandle`].
#[derive(Default)]
pub struct MockState {
    pub observed: bool,
    pub grabbed: bool,
    pub observe_calls: usize,
    pub unobserve_calls: usize,
    pub grab_calls: usize,
    pub ungrab_calls: usize,
    pub clear_changed_calls: usize,
    pub clear_pressed_calls: usize,
    pub pressed_keys: usize,
    pub led: Option<LedState>,
    pub fail_grab: bool,
    pub callback: Option<ValueCallback>,
}

/// Device handle double recording every call for later inspection.
pub struct MockHandle {
    identity: DeviceIdentity,
    metadata: DeviceMetadata,
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn new(product: &str) -> Self {
        Self {
            identity: DeviceIdentity::next(),
            metadata: DeviceMetadata {
                product: Some(product.to_string()),
                vendor_id: Some(0x1234),
                product_id: Some(0x5678),
                ..DeviceMetadata::default()
            },
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Shared state probe, usable after the handle moves into a registry.
    pub fn probe(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    pub fn set_pressed_keys(&self, count: usize) {
        self.state.lock().pressed_keys = count;
    }

    pub fn fail_grab(&self) {
        self.state.lock().fail_grab = true;
    }
}

impl DeviceHandle for MockHandle {
    fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    fn metadata(&self) -> &DeviceMetadata {
        &self.metadata
    }

    fn observe(&mut self, callback: ValueCallback) {
        let mut state = self.state.lock();
        state.observed = true;
        state.observe_calls += 1;
        state.callback = Some(callback);
    }

    fn unobserve(&mut self) {
        let mut state = self.state.lock();
        state.observed = false;
        state.unobserve_calls += 1;
    }

    fn grab(&mut self, callback: ValueCallback) -> Result<()> {
        let mut state = self.state.lock();
        state.grab_calls += 1;
        if state.fail_grab {
            bail!("mock grab failure");
        }
        state.grabbed = true;
        state.callback = Some(callback);
        Ok(())
    }

    fn ungrab(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.grabbed = false;
        state.ungrab_calls += 1;
        Ok(())
    }

    fn set_caps_lock_led_state(&mut self, led: LedState) {
        self.state.lock().led = Some(led);
    }

    fn pressed_keys_count(&self) -> usize {
        self.state.lock().pressed_keys
    }

    fn clear_changed_keys(&mut self) {
        self.state.lock().clear_changed_calls += 1;
    }

    fn clear_pressed_keys(&mut self) {
        let mut state = self.state.lock();
        state.clear_pressed_calls += 1;
        state.pressed_keys = 0;
    }
}

/// Remap engine double recording forwarded events.
#[derive(Default)]
pub struct MockEngine {
    ready: AtomicBool,
    pub events: Mutex<Vec<(DeviceIdentity, KeyCode, bool)>>,
}

impl MockEngine {
    pub fn ready() -> Arc<Self> {
        let engine = Arc::new(Self::default());
        engine.ready.store(true, Ordering::SeqCst);
        engine
    }

    pub fn not_ready() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

impl RemapEngine for MockEngine {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn handle_keyboard_event(&self, device: DeviceIdentity, key_code: KeyCode, pressed: bool) {
        self.events.lock().push((device, key_code, pressed));
    }
}

/// System caps-lock double.
#[derive(Default)]
pub struct MockCapsLock {
    pub state: Arc<Mutex<Option<bool>>>,
}

impl MockCapsLock {
    pub fn with_state(state: Option<bool>) -> (Self, Arc<Mutex<Option<bool>>>) {
        let shared = Arc::new(Mutex::new(state));
        (
            Self {
                state: Arc::clone(&shared),
            },
            shared,
        )
    }
}

impl SystemCapsLock for MockCapsLock {
    fn caps_lock_state(&self) -> Option<bool> {
        *self.state.lock()
    }

    fn set_caps_lock_state(&mut self, state: bool) {
        *self.state.lock() = Some(state);
    }
}

/// Session client double counting calls.
#[derive(Default)]
pub struct MockSession {
    pub connect_acks: Mutex<usize>,
    pub key_repeat_stops: Mutex<usize>,
}

impl SessionClient for MockSession {
    fn connect_ack(&self) {
        *self.connect_acks.lock() += 1;
    }

    fn stop_key_repeat(&self) {
        *self.key_repeat_stops.lock() += 1;
    }
}
