//! Logged-in-session client
//!
//! Small notification channel to the console user's session agent, used for
//! the connect handshake acknowledgement and key-repeat cancellation around
//! the ungrab boundary. Delivery is best-effort over a unix datagram; a
//! missing agent is not an error.

use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

pub trait SessionClient: Send + Sync {
    /// Acknowledge a session agent connect handshake.
    fn connect_ack(&self);
    /// Cancel any pending key repeat in the session.
    fn stop_key_repeat(&self);
}

/// Session client posting JSON one-liners to the session agent socket.
pub struct ConsoleUserClient {
    socket_path: PathBuf,
}

impl ConsoleUserClient {
    pub fn new() -> Self {
        Self {
            socket_path: session_socket_path(),
        }
    }

    fn post(&self, message: &str) {
        let socket = match UnixDatagram::unbound() {
            Ok(socket) => socket,
            Err(e) => {
                tracing::debug!("Could not create session socket: {}", e);
                return;
            }
        };

        if let Err(e) = socket.send_to(message.as_bytes(), &self.socket_path) {
            tracing::debug!(
                "Could not post to session agent at {}: {}",
                self.socket_path.display(),
                e
            );
        }
    }
}

impl Default for ConsoleUserClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClient for ConsoleUserClient {
    fn connect_ack(&self) {
        self.post(r#"{"type":"connect_ack"}"#);
    }

    fn stop_key_repeat(&self) {
        self.post(r#"{"type":"stop_key_repeat"}"#);
    }
}

/// Session agent socket path based on environment
///
/// Returns `$XDG_RUNTIME_DIR/keygrab-session.sock` if the environment
/// variable is set, otherwise falls back to `/tmp/keygrab-session-$UID.sock`.
pub fn session_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("keygrab-session.sock")
    } else {
        let uid = unsafe { nix::libc::getuid() };
        PathBuf::from(format!("/tmp/keygrab-session-{}.sock", uid))
    }
}
