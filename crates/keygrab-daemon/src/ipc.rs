//! IPC server for daemon communication
//!
//! Provides a Unix domain socket for the CLI and external tools to drive the
//! running daemon: grab/ungrab requests, status queries, and config reload.

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use nix::libc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::device::CapabilityState;
use crate::grabber::{DeviceSummary, StatusReport};

// ============================================================================
// IPC Message Types
// ============================================================================

/// Request messages sent from CLI/external tools to the daemon
///
/// These messages are serialized as JSON with a `type` field for discrimination:
/// - `{"type": "grab"}`
/// - `{"type": "ungrab"}`
/// - `{"type": "status"}`
/// - `{"type": "reload"}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Start grabbing all registered keyboards
    Grab,
    /// Release all grabbed keyboards back to the OS
    Ungrab,
    /// Query overall daemon status
    Status,
    /// Reload the configuration file
    Reload,
}

/// Response messages sent from the daemon back to CLI/external tools
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Operation completed successfully
    Success {
        /// Optional message with additional details
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Daemon status information
    Status {
        /// Whether keyboards are currently seized
        grabbed: bool,
        /// Status of each registered device
        devices: Vec<DeviceStatus>,
    },
    /// Error occurred while processing request
    Error {
        /// Error description
        message: String,
    },
}

/// Status information for a single registered device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Registry identity of the device
    pub identity: u64,
    /// Product name, when the device reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// USB vendor id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u32>,
    /// USB product id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u32>,
    /// Current capability state: "observed" or "grabbed"
    pub state: String,
}

impl From<&DeviceSummary> for DeviceStatus {
    fn from(summary: &DeviceSummary) -> Self {
        let state = match summary.state {
            CapabilityState::Observed => "observed",
            CapabilityState::Grabbed => "grabbed",
            CapabilityState::Excluded => "excluded",
        };
        Self {
            identity: summary.identity,
            product: summary.product.clone(),
            vendor_id: summary.vendor_id,
            product_id: summary.product_id,
            state: state.to_string(),
        }
    }
}

impl From<&StatusReport> for IpcResponse {
    fn from(report: &StatusReport) -> Self {
        IpcResponse::Status {
            grabbed: report.grabbed,
            devices: report.devices.iter().map(DeviceStatus::from).collect(),
        }
    }
}

// ============================================================================
// IPC Server
// ============================================================================

/// IPC server for daemon communication via Unix domain socket
///
/// The socket is created at `$XDG_RUNTIME_DIR/keygrab.sock` if available,
/// or falls back to `/tmp/keygrab-$UID.sock` if XDG_RUNTIME_DIR is not set.
///
/// The socket file is automatically removed when the server is dropped.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Create a new IPC server
    ///
    /// Removes any stale socket file left over from a previous run before
    /// binding.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing socket file cannot be removed or the
    /// socket cannot be created or bound.
    pub fn new() -> Result<Self> {
        let socket_path = Self::determine_socket_path();

        tracing::info!("IPC socket path: {}", socket_path.display());

        if socket_path.exists() {
            tracing::debug!("Removing stale socket file: {}", socket_path.display());
            std::fs::remove_file(&socket_path).with_context(|| {
                format!(
                    "Failed to remove stale socket file: {}",
                    socket_path.display()
                )
            })?;
        }

        let listener = UnixListener::bind(&socket_path).with_context(|| {
            format!("Failed to create IPC socket at {}", socket_path.display())
        })?;

        tracing::info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Accept an incoming connection
    ///
    /// # Errors
    ///
    /// Returns an error if accepting the connection fails.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept IPC connection")?;

        tracing::debug!("Accepted IPC connection");

        Ok(stream)
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Determine the socket path based on environment
    ///
    /// Prefers `$XDG_RUNTIME_DIR/keygrab.sock` if the environment variable
    /// is set, otherwise falls back to `/tmp/keygrab-$UID.sock`.
    pub fn determine_socket_path() -> PathBuf {
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(runtime_dir).join("keygrab.sock")
        } else {
            tracing::warn!("XDG_RUNTIME_DIR not set, using fallback socket path in /tmp");
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/keygrab-{}.sock", uid))
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file on shutdown
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("Failed to remove IPC socket file on shutdown: {}", e);
            } else {
                tracing::debug!("Removed IPC socket file: {}", self.socket_path.display());
            }
        }
    }
}

// ============================================================================
// IPC Connection Handler
// ============================================================================

/// Handle an incoming IPC connection.
///
/// Reads one line of JSON from the stream, parses it as an [`IpcRequest`],
/// runs the handler, and writes the [`IpcResponse`] back as a JSON line. The
/// handler is async so it can query the grab orchestrator.
///
/// # Errors
///
/// Returns an error if reading from or writing to the stream fails, or if
/// response serialization fails.
pub async fn handle_ipc_connection<F, Fut>(mut stream: UnixStream, handler: F) -> Result<()>
where
    F: FnOnce(IpcRequest) -> Fut,
    Fut: Future<Output = IpcResponse>,
{
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    // Read a line (JSON message terminated by newline)
    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read IPC request")?;

    if bytes_read == 0 {
        // Connection closed without sending data
        tracing::debug!("IPC connection closed without data");
        return Ok(());
    }

    let line = line.trim();

    tracing::debug!("Received IPC request: {}", line);

    let response = match serde_json::from_str::<IpcRequest>(line) {
        Ok(request) => {
            tracing::debug!("Parsed IPC request: {:?}", request);
            handler(request).await
        }
        Err(e) => {
            tracing::warn!("Failed to parse IPC request: {}", e);
            IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            }
        }
    };

    let response_json =
        serde_json::to_string(&response).context("Failed to serialize IPC response")?;

    tracing::debug!("Sending IPC response: {}", response_json);

    writer
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write IPC response")?;

    writer
        .write_all(b"\n")
        .await
        .context("Failed to write newline")?;

    writer.flush().await.context("Failed to flush IPC response")?;

    Ok(())
}
