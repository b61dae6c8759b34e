//! keygrab CLI
//!
//! Control and configuration tool for keygrab.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use nix::libc;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "keygrab")]
#[command(about = "Keyboard grabbing and remapping tool")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/keygrab/config.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List available input devices
    Devices,

    /// Show current daemon status
    Status,

    /// Ask the daemon to grab all keyboards
    Grab,

    /// Ask the daemon to release all keyboards
    Ungrab,

    /// Reload daemon configuration
    Reload,
}

/// Wire requests, matching the daemon's IPC format.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcRequest {
    Grab,
    Ungrab,
    Status,
    Reload,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcResponse {
    Success {
        message: Option<String>,
    },
    Status {
        grabbed: bool,
        devices: Vec<DeviceStatus>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct DeviceStatus {
    identity: u64,
    product: Option<String>,
    vendor_id: Option<u32>,
    product_id: Option<u32>,
    state: String,
}

fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();

    match cli.command {
        Commands::Validate => cmd_validate(&config_path),
        Commands::Devices => cmd_devices(),
        Commands::Status => cmd_status(),
        Commands::Grab => cmd_simple_request(IpcRequest::Grab),
        Commands::Ungrab => cmd_simple_request(IpcRequest::Ungrab),
        Commands::Reload => cmd_simple_request(IpcRequest::Reload),
    }
}

fn cmd_validate(config_path: &PathBuf) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    match keygrab_config::parse_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!("  Virtual device: {}", config.global.virtual_device_name);
            println!(
                "  Simple modifications: {}",
                config.simple_modifications.len()
            );
            for modification in &config.simple_modifications {
                println!("    - {} -> {}", modification.from, modification.to);
            }
            Ok(())
        }
        Err(e) => Err(miette::miette!("{}", e)),
    }
}

fn cmd_devices() -> miette::Result<()> {
    println!("Available input devices:\n");

    for entry in std::fs::read_dir("/dev/input").into_diagnostic()? {
        let entry = entry.into_diagnostic()?;
        let path = entry.path();

        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            continue;
        }

        match evdev::Device::open(&path) {
            Ok(device) => {
                let name = device.name().unwrap_or("Unknown");
                let id = device.input_id();
                let vendor_product = format!("{:04x}:{:04x}", id.vendor(), id.product());

                // Check if it's a keyboard
                let is_keyboard = device.supported_events().contains(evdev::EventType::KEY)
                    && device
                        .supported_keys()
                        .map(|keys| keys.contains(evdev::Key::KEY_A))
                        .unwrap_or(false);

                let device_type = if is_keyboard { "keyboard" } else { "other" };

                println!("  {} [{}]", name, device_type);
                println!("    Path: {}", path.display());
                println!("    ID: {}", vendor_product);
                println!();
            }
            Err(_) => {
                // Skip devices we can't open
            }
        }
    }

    Ok(())
}

fn cmd_status() -> miette::Result<()> {
    match send_request(&IpcRequest::Status)? {
        IpcResponse::Status { grabbed, devices } => {
            println!(
                "Daemon status: {}",
                if grabbed { "grabbed" } else { "ungrabbed" }
            );
            if devices.is_empty() {
                println!("No registered devices");
            } else {
                println!("Registered devices:");
                for device in devices {
                    println!(
                        "  #{} {} [{}] ({:04x}:{:04x})",
                        device.identity,
                        device.product.as_deref().unwrap_or("Unknown"),
                        device.state,
                        device.vendor_id.unwrap_or(0),
                        device.product_id.unwrap_or(0),
                    );
                }
            }
            Ok(())
        }
        IpcResponse::Error { message } => Err(miette::miette!("daemon error: {}", message)),
        IpcResponse::Success { .. } => Err(miette::miette!("unexpected response from daemon")),
    }
}

fn cmd_simple_request(request: IpcRequest) -> miette::Result<()> {
    match send_request(&request)? {
        IpcResponse::Success { message } => {
            println!("{}", message.as_deref().unwrap_or("ok"));
            Ok(())
        }
        IpcResponse::Error { message } => Err(miette::miette!("daemon error: {}", message)),
        IpcResponse::Status { .. } => Err(miette::miette!("unexpected response from daemon")),
    }
}

/// One request/response exchange with the daemon socket.
fn send_request(request: &IpcRequest) -> miette::Result<IpcResponse> {
    let socket_path = socket_path();
    let mut stream = UnixStream::connect(&socket_path).map_err(|e| {
        miette::miette!(
            "cannot connect to daemon at {} ({}). Is keygrabd running?",
            socket_path.display(),
            e
        )
    })?;

    let request_json = serde_json::to_string(request).into_diagnostic()?;
    stream.write_all(request_json.as_bytes()).into_diagnostic()?;
    stream.write_all(b"\n").into_diagnostic()?;
    stream.flush().into_diagnostic()?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).into_diagnostic()?;

    serde_json::from_str(response_line.trim()).into_diagnostic()
}

/// Same resolution the daemon uses when binding the socket.
fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("keygrab.sock")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/keygrab-{}.sock", uid))
    }
}
