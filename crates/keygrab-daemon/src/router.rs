//! Event routing
//!
//! Decoded raw events from device handles pass through here on their way to
//! the remap engine. The router is a pure read-and-forward stage: it drops
//! everything while the system is not grabbed, translates keyboard page
//! usages inside the sentinel bounds, and maps the vendor fn usage to the
//! synthetic fn modifier. It never blocks and never mutates grab state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::device::DeviceIdentity;
use crate::engine::RemapEngine;
use crate::hid::{usage, usage_page, KeyCode};

pub struct EventRouter {
    grabbed: Arc<AtomicBool>,
    engine: Arc<dyn RemapEngine>,
}

impl EventRouter {
    pub fn new(grabbed: Arc<AtomicBool>, engine: Arc<dyn RemapEngine>) -> Self {
        Self { grabbed, engine }
    }

    /// Route one decoded raw event. Returns the logical key code that was
    /// forwarded, if any.
    pub fn route(
        &self,
        device: DeviceIdentity,
        usage_page: u32,
        usage: u32,
        value: i64,
    ) -> Option<KeyCode> {
        if !self.grabbed.load(Ordering::SeqCst) {
            return None;
        }

        match usage_page {
            self::usage_page::KEYBOARD_OR_KEYPAD => {
                if usage::KEYBOARD_ERROR_UNDEFINED < usage && usage < usage::KEYBOARD_RESERVED {
                    let key_code = KeyCode(usage);
                    let pressed = value != 0;
                    self.engine.handle_keyboard_event(device, key_code, pressed);
                    return Some(key_code);
                }
            }
            self::usage_page::VENDOR_TOP_CASE => {
                if usage == usage::TOP_CASE_KEYBOARD_FN {
                    let pressed = value != 0;
                    self.engine
                        .handle_keyboard_event(device, KeyCode::FN_MODIFIER, pressed);
                    return Some(KeyCode::FN_MODIFIER);
                }
            }
            _ => {}
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;
    use crate::testing::MockEngine;

    fn router(grabbed: bool) -> (EventRouter, Arc<MockEngine>) {
        let engine = MockEngine::ready();
        let flag = Arc::new(AtomicBool::new(grabbed));
        (
            EventRouter::new(flag, Arc::clone(&engine) as Arc<dyn RemapEngine>),
            engine,
        )
    }

    #[test]
    fn test_discards_while_not_grabbed() {
        let (router, engine) = router(false);
        let device = DeviceIdentity::next();

        router.route(device, usage_page::KEYBOARD_OR_KEYPAD, 0x04, 1);
        assert!(engine.events.lock().is_empty());
    }

    #[test]
    fn test_forwards_press_and_release_when_grabbed() {
        let (router, engine) = router(true);
        let device = DeviceIdentity::next();

        router.route(device, usage_page::KEYBOARD_OR_KEYPAD, 0x04, 1);
        router.route(device, usage_page::KEYBOARD_OR_KEYPAD, 0x04, 0);

        let events = engine.events.lock();
        assert_eq!(
            *events,
            vec![
                (device, KeyCode(0x04), true),
                (device, KeyCode(0x04), false),
            ]
        );
    }

    #[test]
    fn test_sentinels_are_excluded() {
        let (router, engine) = router(true);
        let device = DeviceIdentity::next();

        router.route(
            device,
            usage_page::KEYBOARD_OR_KEYPAD,
            usage::KEYBOARD_ERROR_UNDEFINED,
            1,
        );
        router.route(
            device,
            usage_page::KEYBOARD_OR_KEYPAD,
            usage::KEYBOARD_RESERVED,
            1,
        );
        assert!(engine.events.lock().is_empty());

        // First usage above the lower sentinel routes
        router.route(
            device,
            usage_page::KEYBOARD_OR_KEYPAD,
            usage::KEYBOARD_ERROR_UNDEFINED + 1,
            1,
        );
        assert_eq!(engine.events.lock().len(), 1);
    }

    #[test]
    fn test_vendor_fn_maps_to_synthetic_modifier() {
        let (router, engine) = router(true);
        let device = DeviceIdentity::next();

        let routed = router.route(
            device,
            usage_page::VENDOR_TOP_CASE,
            usage::TOP_CASE_KEYBOARD_FN,
            1,
        );
        assert_eq!(routed, Some(KeyCode::FN_MODIFIER));
        assert_eq!(
            *engine.events.lock(),
            vec![(device, KeyCode::FN_MODIFIER, true)]
        );
    }

    #[test]
    fn test_other_vendor_usages_are_ignored() {
        let (router, engine) = router(true);
        let device = DeviceIdentity::next();

        router.route(device, usage_page::VENDOR_TOP_CASE, 0x99, 1);
        assert!(engine.events.lock().is_empty());
    }

    #[test]
    fn test_unknown_usage_page_is_ignored() {
        let (router, engine) = router(true);
        let device = DeviceIdentity::next();

        router.route(device, 0x0c, 0xe9, 1);
        assert!(engine.events.lock().is_empty());
    }
}
