//! keygrab daemon
//!
//! Seizes keyboards exclusively, applies the simple modification table, and
//! re-injects the result through a uinput virtual keyboard. Grab and ungrab
//! are driven over the IPC socket or at startup.

mod caps_lock;
mod device;
mod engine;
mod grabber;
mod hid;
mod hotplug;
mod injector;
mod ipc;
mod modifier;
mod registry;
mod router;
mod session;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter};

use keygrab_config::{Config, LogLevel, SimpleModification};

use crate::caps_lock::LedCapsLock;
use crate::engine::Remapper;
use crate::grabber::Grabber;
use crate::hotplug::HotplugEvent;
use crate::ipc::{handle_ipc_connection, IpcRequest, IpcResponse, IpcServer};
use crate::modifier::SimpleModifications;
use crate::session::ConsoleUserClient;

#[derive(Parser, Debug)]
#[command(name = "keygrabd")]
#[command(about = "Keyboard grabbing and remapping daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/keygrab/config.kdl")]
    config: String,

    /// Do not grab devices at startup; wait for an IPC grab request
    #[arg(long)]
    no_grab: bool,
}

fn default_log_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// Resolve the config's key-name pairs and replace the live table.
///
/// Unresolvable names are skipped with a warning so one typo never blocks
/// the rest of the table.
fn apply_simple_modifications(grabber: &Grabber, modifications: &[SimpleModification]) {
    grabber.clear_simple_modifications();

    for modification in modifications {
        let Some(from) = hid::key_code_from_name(&modification.from) else {
            tracing::warn!("Unknown key name in remap: {}", modification.from);
            continue;
        };
        let Some(to) = hid::key_code_from_name(&modification.to) else {
            tracing::warn!("Unknown key name in remap: {}", modification.to);
            continue;
        };
        grabber.add_simple_modification(from, to);
    }
}

async fn handle_ipc_request(
    request: IpcRequest,
    grabber: Grabber,
    config_path: PathBuf,
) -> IpcResponse {
    match request {
        IpcRequest::Grab => {
            grabber.grab_devices();
            IpcResponse::Success {
                message: Some("grab requested".to_string()),
            }
        }
        IpcRequest::Ungrab => {
            grabber.ungrab_devices();
            IpcResponse::Success {
                message: Some("ungrab requested".to_string()),
            }
        }
        IpcRequest::Status => match grabber.status().await {
            Some(report) => IpcResponse::from(&report),
            None => IpcResponse::Error {
                message: "daemon is shutting down".to_string(),
            },
        },
        IpcRequest::Reload => match keygrab_config::parse_config(&config_path) {
            Ok(config) => {
                apply_simple_modifications(&grabber, &config.simple_modifications);
                tracing::info!(
                    "Reloaded configuration with {} modification(s)",
                    config.simple_modifications.len()
                );
                IpcResponse::Success {
                    message: Some(format!(
                        "reloaded {} modification(s)",
                        config.simple_modifications.len()
                    )),
                }
            }
            Err(e) => IpcResponse::Error {
                message: format!("config reload failed: {}", e),
            },
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging comes up before the config loads so parse diagnostics are
    // visible; the configured level is applied afterwards through the
    // reload handle. RUST_LOG wins over the configured level.
    let env_filter_set = std::env::var_os("RUST_LOG").is_some();
    let (filter, filter_handle) = reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();

    // A missing config file is not fatal; the daemon runs with defaults
    let config = if config_path.exists() {
        keygrab_config::parse_config(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else {
        Config::default()
    };

    if !env_filter_set {
        let directive = default_log_directive(config.global.log_level);
        if let Err(e) = filter_handle.reload(EnvFilter::new(directive)) {
            tracing::debug!("Could not apply configured log level: {}", e);
        }
    }

    tracing::info!(
        "Loaded configuration from {} with {} modification(s)",
        config_path.display(),
        config.simple_modifications.len()
    );

    // Virtual output keyboard; its name also marks self-originated devices
    let output = injector::create_shared_virtual_device(&config.global.virtual_device_name)?;
    let modifications = SimpleModifications::new();
    let engine = Arc::new(Remapper::new(modifications.clone(), output));

    let (grabber, grabber_task) = Grabber::spawn(
        engine as Arc<dyn engine::RemapEngine>,
        Box::new(LedCapsLock::discover()),
        Arc::new(ConsoleUserClient::new()),
        modifications,
        config.global.virtual_device_name.clone(),
    );

    grabber.post_connect_ack();
    apply_simple_modifications(&grabber, &config.simple_modifications);

    // Seed the registry with everything already attached
    for devnode in device::enumerate_keyboards() {
        grabber.device_added(devnode);
    }

    // Hotplug: a failed monitor leaves the daemon running with the devices
    // it already found
    let (hotplug_tx, mut hotplug_rx) = mpsc::unbounded_channel();
    if let Err(e) = hotplug::spawn_monitor(hotplug_tx) {
        tracing::warn!("Hotplug monitoring unavailable: {:#}", e);
    }
    {
        let grabber = grabber.clone();
        tokio::spawn(async move {
            while let Some(event) = hotplug_rx.recv().await {
                match event {
                    HotplugEvent::Added { devnode } => grabber.device_added(devnode),
                    HotplugEvent::Removed { devnode } => grabber.device_removed(devnode),
                }
            }
        });
    }

    let ipc_server = IpcServer::new()?;
    {
        let grabber = grabber.clone();
        let config_path = config_path.clone();
        tokio::spawn(async move {
            loop {
                let stream = match ipc_server.accept().await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!("IPC accept failed: {:#}", e);
                        continue;
                    }
                };

                let grabber = grabber.clone();
                let config_path = config_path.clone();
                tokio::spawn(async move {
                    let result = handle_ipc_connection(stream, |request| {
                        handle_ipc_request(request, grabber, config_path)
                    })
                    .await;
                    if let Err(e) = result {
                        tracing::warn!("IPC connection error: {:#}", e);
                    }
                });
            }
        });
    }

    if args.no_grab {
        tracing::info!("Startup grab disabled; waiting for IPC requests");
    } else {
        grabber.grab_devices();
    }

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    grabber.ungrab_devices();
    grabber.shutdown();
    grabber_task.await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::Registry;

    #[test]
    fn test_configured_level_reloads_filter() {
        // The startup path swaps the filter after the config loads; every
        // configurable level must produce a valid directive.
        let (_filter, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        for level in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            handle
                .reload(EnvFilter::new(default_log_directive(level)))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_unknown_remap_names_are_skipped() {
        use crate::engine::RemapEngine;
        use crate::testing::{MockCapsLock, MockEngine, MockSession};

        let engine = MockEngine::ready();
        let (caps_lock, _caps_state) = MockCapsLock::with_state(None);
        let modifications = SimpleModifications::new();
        let (grabber, task) = Grabber::spawn(
            engine as Arc<dyn RemapEngine>,
            Box::new(caps_lock),
            Arc::new(MockSession::default()),
            modifications.clone(),
            "keygrab virtual keyboard".to_string(),
        );

        apply_simple_modifications(
            &grabber,
            &[
                SimpleModification {
                    from: "CapsLock".to_string(),
                    to: "Escape".to_string(),
                },
                SimpleModification {
                    from: "NoSuchKey".to_string(),
                    to: "A".to_string(),
                },
            ],
        );

        // The typo is skipped; the valid pair still lands
        assert_eq!(modifications.len(), 1);
        assert_eq!(
            modifications.get(hid::KeyCode(0x39)),
            Some(hid::KeyCode(0x29))
        );

        grabber.shutdown();
        task.await.unwrap();
    }
}
