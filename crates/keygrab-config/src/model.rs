//! Configuration data model

/// Root configuration structure
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: GlobalConfig,
    pub simple_modifications: Vec<SimpleModification>,
}

/// Global settings
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Name given to the uinput virtual keyboard. Devices whose manufacturer
    /// matches this string are treated as self-originated and never grabbed.
    pub virtual_device_name: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            virtual_device_name: String::from("keygrab virtual keyboard"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// A single physical-key substitution (`remap "From" "To"` in the config).
///
/// Key names are resolved to HID keyboard usages by the daemon; the config
/// layer only carries them as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleModification {
    pub from: String,
    pub to: String,
}
