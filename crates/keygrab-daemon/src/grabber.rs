//! Grab state machine
//!
//! Central orchestrator for device grab/ungrab. All state lives in a single
//! actor task; the cloneable [`Grabber`] handle marshals every request onto
//! that task through a channel, so racing callers serialize into a
//! well-defined last-request-wins order. Device hot-plug notifications and
//! decoded per-device events arrive through the same channel and are
//! processed one at a time, which makes each grab/ungrab transition atomic
//! from every other caller's point of view.
//!
//! A `grab_devices()` request arms a 100 ms retry timer. Each tick checks
//! two preconditions (the remap engine is ready, no keys are held down
//! anywhere) and only then seizes every registered device, so a grab can
//! never swallow an in-flight key release. Retries are unbounded by design:
//! the request stays armed until it succeeds or an ungrab/shutdown
//! intervenes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};

use crate::caps_lock::SystemCapsLock;
use crate::device::{CapabilityState, DeviceHandle, DeviceIdentity, EvdevHandle, ValueCallback};
use crate::engine::RemapEngine;
use crate::hid::{KeyCode, LedState};
use crate::modifier::{ModifierFlagTracker, SimpleModifications};
use crate::registry::DeviceRegistry;
use crate::router::EventRouter;
use crate::session::SessionClient;

/// Fixed retry interval for the grab timer
const GRAB_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Requests marshaled onto the orchestration loop
enum Command {
    GrabDevices,
    UngrabDevices,
    DeviceAdded {
        devnode: PathBuf,
    },
    DeviceRemoved {
        devnode: PathBuf,
    },
    InputValue {
        device: DeviceIdentity,
        usage_page: u32,
        usage: u32,
        value: i64,
    },
    SetCapsLockLedState(LedState),
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    Shutdown,
}

/// Snapshot of orchestrator state for status queries
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub grabbed: bool,
    pub devices: Vec<DeviceSummary>,
}

#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub identity: u64,
    pub product: Option<String>,
    pub vendor_id: Option<u32>,
    pub product_id: Option<u32>,
    pub state: CapabilityState,
}

/// Thread-callable handle to the grab orchestrator.
///
/// Every method is safe to call from any thread; requests complete
/// asynchronously on the orchestration loop. Simple modification mutation
/// goes directly to the shared table under its own lock, independent of the
/// loop.
#[derive(Clone)]
pub struct Grabber {
    tx: mpsc::UnboundedSender<Command>,
    grabbed: Arc<AtomicBool>,
    session: Arc<dyn SessionClient>,
    modifications: SimpleModifications,
}

impl Grabber {
    /// Spawn the orchestrator actor and return its handle.
    pub fn spawn(
        engine: Arc<dyn RemapEngine>,
        caps_lock: Box<dyn SystemCapsLock>,
        session: Arc<dyn SessionClient>,
        modifications: SimpleModifications,
        self_name: String,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let grabbed = Arc::new(AtomicBool::new(false));
        let router = EventRouter::new(Arc::clone(&grabbed), Arc::clone(&engine));

        let actor = GrabberActor {
            rx,
            tx: tx.clone(),
            registry: DeviceRegistry::new(self_name),
            router,
            engine,
            caps_lock,
            session: Arc::clone(&session),
            modifier_flags: ModifierFlagTracker::new(),
            grabbed: Arc::clone(&grabbed),
            grab_timer: None,
            grab_retry_count: 0,
            last_warning_secs: None,
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                tx,
                grabbed,
                session,
                modifications,
            },
            task,
        )
    }

    pub fn grab_devices(&self) {
        let _ = self.tx.send(Command::GrabDevices);
    }

    pub fn ungrab_devices(&self) {
        let _ = self.tx.send(Command::UngrabDevices);
    }

    pub fn device_added(&self, devnode: PathBuf) {
        let _ = self.tx.send(Command::DeviceAdded { devnode });
    }

    pub fn device_removed(&self, devnode: PathBuf) {
        let _ = self.tx.send(Command::DeviceRemoved { devnode });
    }

    pub fn set_caps_lock_led_state(&self, state: LedState) {
        let _ = self.tx.send(Command::SetCapsLockLedState(state));
    }

    /// Forward the session handshake acknowledgement.
    pub fn post_connect_ack(&self) {
        self.session.connect_ack();
    }

    pub fn clear_simple_modifications(&self) {
        self.modifications.clear();
    }

    pub fn add_simple_modification(&self, from: KeyCode, to: KeyCode) {
        self.modifications.set(from, to);
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> Option<StatusReport> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Status { reply }).ok()?;
        rx.await.ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Outcome of one grab timer tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    AlreadyGrabbed,
    Warned,
    WarningSuppressed,
    Completed,
}

enum Wake {
    Command(Option<Command>),
    Tick,
}

struct GrabberActor {
    rx: mpsc::UnboundedReceiver<Command>,
    /// Sender side of our own channel, handed to device handles as the
    /// event-routing callback target.
    tx: mpsc::UnboundedSender<Command>,
    registry: DeviceRegistry,
    router: EventRouter,
    engine: Arc<dyn RemapEngine>,
    caps_lock: Box<dyn SystemCapsLock>,
    session: Arc<dyn SessionClient>,
    modifier_flags: ModifierFlagTracker,
    /// Process-wide grabbed flag; this actor is the only writer.
    grabbed: Arc<AtomicBool>,
    /// The owned, replaceable grab timer. Arming always replaces any prior
    /// value, which guarantees at most one live timer.
    grab_timer: Option<Interval>,
    grab_retry_count: usize,
    last_warning_secs: Option<u64>,
}

impl GrabberActor {
    async fn run(mut self) {
        loop {
            let wake = match self.grab_timer.as_mut() {
                Some(timer) => tokio::select! {
                    command = self.rx.recv() => Wake::Command(command),
                    _ = timer.tick() => Wake::Tick,
                },
                None => Wake::Command(self.rx.recv().await),
            };

            match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(command)) => {
                    if self.handle_command(command) {
                        break;
                    }
                }
                Wake::Tick => {
                    self.grab_tick();
                }
            }
        }
    }

    /// Returns true when the actor should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::GrabDevices => self.handle_grab_devices(),
            Command::UngrabDevices => self.handle_ungrab_devices(),
            Command::DeviceAdded { devnode } => self.handle_device_added(&devnode),
            Command::DeviceRemoved { devnode } => self.handle_device_removed(&devnode),
            Command::InputValue {
                device,
                usage_page,
                usage,
                value,
            } => self.handle_input_value(device, usage_page, usage, value),
            Command::SetCapsLockLedState(state) => {
                for entry in self.registry.entries_mut() {
                    entry.handle.set_caps_lock_led_state(state);
                }
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status_report());
            }
            Command::Shutdown => {
                // Timer must die before the registry so no tick can fire
                // into released devices.
                self.grab_timer = None;
                self.registry.clear();
                return true;
            }
        }
        false
    }

    fn handle_grab_devices(&mut self) {
        // Arming always replaces any prior timer
        self.grab_timer = None;
        self.grab_retry_count = 0;
        self.last_warning_secs = None;

        let start = tokio::time::Instant::now() + GRAB_RETRY_INTERVAL;
        let mut timer = tokio::time::interval_at(start, GRAB_RETRY_INTERVAL);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.grab_timer = Some(timer);
    }

    fn grab_tick(&mut self) {
        let _ = self.grab_tick_at(unix_seconds());
    }

    fn grab_tick_at(&mut self, now_secs: u64) -> TickOutcome {
        if self.grabbed.load(Ordering::SeqCst) {
            return TickOutcome::AlreadyGrabbed;
        }

        let mut warning = None;
        if !self.engine.is_ready() {
            warning = Some("remap engine is not ready. Please wait for a while.");
        }
        if self.registry.total_pressed_keys() > 0 {
            warning = Some("There are pressed down keys in some devices. Please release them.");
        }

        if let Some(message) = warning {
            self.grab_retry_count += 1;
            if self.last_warning_secs == Some(now_secs) {
                return TickOutcome::WarningSuppressed;
            }
            self.last_warning_secs = Some(now_secs);
            tracing::warn!("{}", message);
            return TickOutcome::Warned;
        }

        self.grabbed.store(true, Ordering::SeqCst);

        for identity in self.registry.identities() {
            self.grab_device(identity);
            if let Some(entry) = self.registry.get_mut(identity) {
                entry.handle.clear_changed_keys();
                entry.handle.clear_pressed_keys();
            }
        }

        self.modifier_flags.reset();
        self.caps_lock.set_caps_lock_state(false);
        tracing::info!("devices are grabbed");

        self.grab_timer = None;
        TickOutcome::Completed
    }

    fn handle_ungrab_devices(&mut self) {
        let armed = self.grab_timer.is_some();
        if !self.grabbed.load(Ordering::SeqCst) && !armed {
            // Already ungrabbed
            return;
        }

        self.grabbed.store(false, Ordering::SeqCst);
        self.grab_timer = None;

        for identity in self.registry.identities() {
            self.ungrab_device(identity);
            if let Some(entry) = self.registry.get_mut(identity) {
                entry.handle.clear_changed_keys();
                entry.handle.clear_pressed_keys();
            }
        }

        self.modifier_flags.reset();
        self.caps_lock.set_caps_lock_state(false);
        self.session.stop_key_repeat();
        tracing::info!("devices are ungrabbed");
    }

    /// Put one device into the grabbed capability state.
    fn grab_device(&mut self, identity: DeviceIdentity) {
        if self.registry.is_self_originated(identity) {
            return;
        }

        let callback = self.value_callback();
        let fallback = Arc::clone(&callback);
        let caps_on = self.caps_lock.caps_lock_state().unwrap_or(false);

        let Some(entry) = self.registry.get_mut(identity) else {
            return;
        };

        // Observation and exclusive seizure are mutually exclusive
        entry.handle.unobserve();
        match entry.handle.grab(callback) {
            Ok(()) => {
                entry.state = CapabilityState::Grabbed;
                let led = if caps_on { LedState::On } else { LedState::Off };
                entry.handle.set_caps_lock_led_state(led);
            }
            Err(e) => {
                tracing::warn!("Failed to grab device {}: {:#}", identity, e);
                // Stays merely observed; the next grab_devices() retries it
                entry.handle.observe(fallback);
                entry.state = CapabilityState::Observed;
            }
        }
    }

    /// Put one device back into the observed capability state.
    fn ungrab_device(&mut self, identity: DeviceIdentity) {
        if self.registry.is_self_originated(identity) {
            return;
        }

        let callback = self.value_callback();
        let Some(entry) = self.registry.get_mut(identity) else {
            return;
        };

        if let Err(e) = entry.handle.ungrab() {
            tracing::warn!("Failed to ungrab device {}: {:#}", identity, e);
        }
        entry.handle.observe(callback);
        entry.state = CapabilityState::Observed;
    }

    fn observe_device(&mut self, identity: DeviceIdentity) {
        if self.registry.is_self_originated(identity) {
            return;
        }

        let callback = self.value_callback();
        if let Some(entry) = self.registry.get_mut(identity) {
            entry.handle.observe(callback);
            entry.state = CapabilityState::Observed;
        }
    }

    /// Register a device handle and place it into the capability state
    /// matching the current grabbed flag.
    fn register_handle(&mut self, handle: Box<dyn DeviceHandle>, devnode: Option<PathBuf>) {
        let identity = handle.identity();
        {
            let metadata = handle.metadata();
            tracing::info!(
                "matching device: manufacturer:{}, product:{}, vendor_id:{:#x}, \
                 product_id:{:#x}, location:{}, serial_number:{}, identity:{}",
                metadata.manufacturer.as_deref().unwrap_or(""),
                metadata.product.as_deref().unwrap_or(""),
                metadata.vendor_id.unwrap_or(0),
                metadata.product_id.unwrap_or(0),
                metadata.location.as_deref().unwrap_or(""),
                metadata.serial_number.as_deref().unwrap_or(""),
                identity,
            );
        }

        self.registry.insert(handle, devnode);

        if self.registry.is_self_originated(identity) {
            tracing::debug!("device {} is self-originated, tracked only", identity);
            return;
        }

        if self.grabbed.load(Ordering::SeqCst) {
            self.grab_device(identity);
        } else {
            self.observe_device(identity);
        }
    }

    fn handle_device_added(&mut self, devnode: &Path) {
        if self.registry.identity_for_devnode(devnode).is_some() {
            tracing::debug!("{} is already tracked", devnode.display());
            return;
        }

        let handle = match EvdevHandle::open(devnode) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!("Ignoring device at {}: {:#}", devnode.display(), e);
                return;
            }
        };

        if !handle.is_keyboard() {
            tracing::debug!("{} is not a keyboard, ignoring", devnode.display());
            return;
        }

        self.register_handle(Box::new(handle), Some(devnode.to_path_buf()));
    }

    fn handle_device_removed(&mut self, devnode: &Path) {
        let Some(identity) = self.registry.identity_for_devnode(devnode) else {
            // Never matched, or removed as self-originated
            tracing::debug!("Removal of untracked device at {}", devnode.display());
            return;
        };

        if let Some(entry) = self.registry.remove(identity) {
            let metadata = entry.handle.metadata();
            tracing::info!(
                "removal device: product:{}, vendor_id:{:#x}, product_id:{:#x}, identity:{}",
                metadata.product.as_deref().unwrap_or(""),
                metadata.vendor_id.unwrap_or(0),
                metadata.product_id.unwrap_or(0),
                identity,
            );
        }
    }

    fn handle_input_value(
        &mut self,
        device: DeviceIdentity,
        usage_page: u32,
        usage: u32,
        value: i64,
    ) {
        if let Some(key_code) = self.router.route(device, usage_page, usage, value) {
            self.modifier_flags.update(key_code, value != 0);
        }
    }

    fn value_callback(&self) -> ValueCallback {
        let tx = self.tx.clone();
        Arc::new(move |device, usage_page, usage, value| {
            let _ = tx.send(Command::InputValue {
                device,
                usage_page,
                usage,
                value,
            });
        })
    }

    fn status_report(&self) -> StatusReport {
        let devices = self
            .registry
            .entries()
            .map(|(identity, entry)| {
                let metadata = entry.handle.metadata();
                DeviceSummary {
                    identity: identity.0,
                    product: metadata.product.clone(),
                    vendor_id: metadata.vendor_id,
                    product_id: metadata.product_id,
                    state: entry.state,
                }
            })
            .collect();

        StatusReport {
            grabbed: self.grabbed.load(Ordering::SeqCst),
            devices,
        }
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
