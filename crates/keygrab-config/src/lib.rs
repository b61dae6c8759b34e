//! Configuration parsing for keygrab
//!
//! This crate handles parsing KDL configuration files for the keygrab
//! daemon: global settings and the simple modification table.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{parse_config, parse_config_str};
