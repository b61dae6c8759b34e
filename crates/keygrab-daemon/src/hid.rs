//! HID usage types and evdev translation
//!
//! Decoded device input is expressed as `(usage page, usage, value)` triples
//! on the USB HID namespace. The keyboard/keypad page (0x07) carries physical
//! key positions; a vendor top-case page carries the laptop fn key. The
//! [`KeyCode`] newtype covers the keyboard usage range plus synthetic codes
//! above it.

use evdev::Key;

/// HID usage page numbers routed by the daemon
pub mod usage_page {
    /// Keyboard/Keypad page (USB HID Usage Tables, section 10)
    pub const KEYBOARD_OR_KEYPAD: u32 = 0x07;
    /// Vendor top-case page carrying the keyboard fn key
    pub const VENDOR_TOP_CASE: u32 = 0x00ff;
}

/// Usage sentinels and vendor usages
pub mod usage {
    /// ErrorUndefined sentinel; routable keyboard usages start above this
    pub const KEYBOARD_ERROR_UNDEFINED: u32 = 0x03;
    /// Reserved sentinel; routable keyboard usages end below this
    pub const KEYBOARD_RESERVED: u32 = 0xffff;
    /// fn key usage on the vendor top-case page
    pub const TOP_CASE_KEYBOARD_FN: u32 = 0x03;
}

/// A logical key code on the HID keyboard usage namespace.
///
/// Values up to `0xffff` are keyboard page usages; values above are
/// synthetic codes that have no hardware usage of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u32);

impl KeyCode {
    /// Synthetic code for the vendor fn modifier
    pub const FN_MODIFIER: KeyCode = KeyCode(0x10003);

    /// True for the modifier block of the keyboard page (LeftCtrl..RightMeta)
    /// and the synthetic fn modifier.
    pub fn is_modifier(self) -> bool {
        (0xe0..=0xe7).contains(&self.0) || self == Self::FN_MODIFIER
    }
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match key_name(*self) {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{:#x}", self.0),
        }
    }
}

/// Keyboard LED state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    On,
    Off,
}

struct KeyDef {
    usage: u32,
    name: &'static str,
    evdev: Key,
}

macro_rules! key_defs {
    ($(($usage:expr, $name:expr, $evdev:ident)),* $(,)?) => {
        &[
            $(KeyDef { usage: $usage, name: $name, evdev: Key::$evdev }),*
        ]
    };
}

/// Keyboard page usages with their config names and evdev equivalents.
/// Covers the keys a keyboard-grabbing daemon actually sees; unlisted
/// usages still route, they just cannot be named in the config or injected.
static KEY_DEFS: &[KeyDef] = key_defs![
    (0x04, "A", KEY_A),
    (0x05, "B", KEY_B),
    (0x06, "C", KEY_C),
    (0x07, "D", KEY_D),
    (0x08, "E", KEY_E),
    (0x09, "F", KEY_F),
    (0x0a, "G", KEY_G),
    (0x0b, "H", KEY_H),
    (0x0c, "I", KEY_I),
    (0x0d, "J", KEY_J),
    (0x0e, "K", KEY_K),
    (0x0f, "L", KEY_L),
    (0x10, "M", KEY_M),
    (0x11, "N", KEY_N),
    (0x12, "O", KEY_O),
    (0x13, "P", KEY_P),
    (0x14, "Q", KEY_Q),
    (0x15, "R", KEY_R),
    (0x16, "S", KEY_S),
    (0x17, "T", KEY_T),
    (0x18, "U", KEY_U),
    (0x19, "V", KEY_V),
    (0x1a, "W", KEY_W),
    (0x1b, "X", KEY_X),
    (0x1c, "Y", KEY_Y),
    (0x1d, "Z", KEY_Z),
    (0x1e, "1", KEY_1),
    (0x1f, "2", KEY_2),
    (0x20, "3", KEY_3),
    (0x21, "4", KEY_4),
    (0x22, "5", KEY_5),
    (0x23, "6", KEY_6),
    (0x24, "7", KEY_7),
    (0x25, "8", KEY_8),
    (0x26, "9", KEY_9),
    (0x27, "0", KEY_0),
    (0x28, "Enter", KEY_ENTER),
    (0x29, "Escape", KEY_ESC),
    (0x2a, "Backspace", KEY_BACKSPACE),
    (0x2b, "Tab", KEY_TAB),
    (0x2c, "Space", KEY_SPACE),
    (0x2d, "Minus", KEY_MINUS),
    (0x2e, "Equal", KEY_EQUAL),
    (0x2f, "LeftBracket", KEY_LEFTBRACE),
    (0x30, "RightBracket", KEY_RIGHTBRACE),
    (0x31, "Backslash", KEY_BACKSLASH),
    (0x33, "Semicolon", KEY_SEMICOLON),
    (0x34, "Quote", KEY_APOSTROPHE),
    (0x35, "Grave", KEY_GRAVE),
    (0x36, "Comma", KEY_COMMA),
    (0x37, "Period", KEY_DOT),
    (0x38, "Slash", KEY_SLASH),
    (0x39, "CapsLock", KEY_CAPSLOCK),
    (0x3a, "F1", KEY_F1),
    (0x3b, "F2", KEY_F2),
    (0x3c, "F3", KEY_F3),
    (0x3d, "F4", KEY_F4),
    (0x3e, "F5", KEY_F5),
    (0x3f, "F6", KEY_F6),
    (0x40, "F7", KEY_F7),
    (0x41, "F8", KEY_F8),
    (0x42, "F9", KEY_F9),
    (0x43, "F10", KEY_F10),
    (0x44, "F11", KEY_F11),
    (0x45, "F12", KEY_F12),
    (0x46, "PrintScreen", KEY_SYSRQ),
    (0x47, "ScrollLock", KEY_SCROLLLOCK),
    (0x48, "Pause", KEY_PAUSE),
    (0x49, "Insert", KEY_INSERT),
    (0x4a, "Home", KEY_HOME),
    (0x4b, "PageUp", KEY_PAGEUP),
    (0x4c, "Delete", KEY_DELETE),
    (0x4d, "End", KEY_END),
    (0x4e, "PageDown", KEY_PAGEDOWN),
    (0x4f, "RightArrow", KEY_RIGHT),
    (0x50, "LeftArrow", KEY_LEFT),
    (0x51, "DownArrow", KEY_DOWN),
    (0x52, "UpArrow", KEY_UP),
    (0x53, "NumLock", KEY_NUMLOCK),
    (0x65, "Application", KEY_COMPOSE),
    (0xe0, "LeftCtrl", KEY_LEFTCTRL),
    (0xe1, "LeftShift", KEY_LEFTSHIFT),
    (0xe2, "LeftAlt", KEY_LEFTALT),
    (0xe3, "LeftMeta", KEY_LEFTMETA),
    (0xe4, "RightCtrl", KEY_RIGHTCTRL),
    (0xe5, "RightShift", KEY_RIGHTSHIFT),
    (0xe6, "RightAlt", KEY_RIGHTALT),
    (0xe7, "RightMeta", KEY_RIGHTMETA),
];

/// Translate an evdev key code to its HID keyboard page usage
pub fn usage_from_evdev(key: Key) -> Option<u32> {
    KEY_DEFS.iter().find(|d| d.evdev == key).map(|d| d.usage)
}

/// Translate a HID keyboard page usage to its evdev key code
pub fn evdev_from_usage(usage: u32) -> Option<Key> {
    KEY_DEFS.iter().find(|d| d.usage == usage).map(|d| d.evdev)
}

/// Resolve a config key name (case-insensitive) to a key code
pub fn key_code_from_name(name: &str) -> Option<KeyCode> {
    if name.eq_ignore_ascii_case("Fn") {
        return Some(KeyCode::FN_MODIFIER);
    }
    KEY_DEFS
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
        .map(|d| KeyCode(d.usage))
}

fn key_name(code: KeyCode) -> Option<&'static str> {
    if code == KeyCode::FN_MODIFIER {
        return Some("Fn");
    }
    KEY_DEFS.iter().find(|d| d.usage == code.0).map(|d| d.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_round_trip() {
        for def in KEY_DEFS {
            assert_eq!(usage_from_evdev(def.evdev), Some(def.usage));
            assert_eq!(evdev_from_usage(def.usage), Some(def.evdev));
        }
    }

    #[test]
    fn test_name_resolution() {
        assert_eq!(key_code_from_name("CapsLock"), Some(KeyCode(0x39)));
        assert_eq!(key_code_from_name("capslock"), Some(KeyCode(0x39)));
        assert_eq!(key_code_from_name("Escape"), Some(KeyCode(0x29)));
        assert_eq!(key_code_from_name("Fn"), Some(KeyCode::FN_MODIFIER));
        assert_eq!(key_code_from_name("NoSuchKey"), None);
    }

    #[test]
    fn test_modifier_block() {
        assert!(KeyCode(0xe0).is_modifier());
        assert!(KeyCode(0xe7).is_modifier());
        assert!(KeyCode::FN_MODIFIER.is_modifier());
        assert!(!KeyCode(0x04).is_modifier());
        assert!(!KeyCode(0x39).is_modifier());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(KeyCode(0x04).to_string(), "A");
        assert_eq!(KeyCode::FN_MODIFIER.to_string(), "Fn");
        assert_eq!(KeyCode(0x9999).to_string(), "0x9999");
    }

    #[test]
    fn test_unlisted_usage_has_no_evdev_key() {
        // 0x32 (Non-US #) is deliberately unlisted
        assert_eq!(evdev_from_usage(0x32), None);
    }
}
