//! KDL configuration parser

use std::path::Path;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "simple-modifications" => {
                config.simple_modifications = parse_simple_modifications(node)?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    if let Some(entry) = child.entries().first() {
                        if let Some(val) = entry.value().as_string() {
                            global.log_level = val.parse().map_err(|e| ConfigError::Invalid {
                                message: e,
                            })?;
                        }
                    }
                }
                "virtual-device-name" => {
                    if let Some(entry) = child.entries().first() {
                        if let Some(val) = entry.value().as_string() {
                            global.virtual_device_name = val.to_string();
                        }
                    }
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_simple_modifications(
    node: &kdl::KdlNode,
) -> Result<Vec<SimpleModification>, ConfigError> {
    let mut modifications = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "remap" => {
                    let mut values = child
                        .entries()
                        .iter()
                        .filter_map(|e| e.value().as_string());

                    let from = values.next().ok_or_else(|| ConfigError::MissingField {
                        field: "remap <from>".to_string(),
                    })?;
                    let to = values.next().ok_or_else(|| ConfigError::MissingField {
                        field: "remap <to>".to_string(),
                    })?;

                    modifications.push(SimpleModification {
                        from: from.to_string(),
                        to: to.to_string(),
                    });
                }
                name => {
                    tracing::warn!("Unknown simple-modifications option: {}", name);
                }
            }
        }
    }

    Ok(modifications)
}
