//! Hot-plug device monitoring
//!
//! Watches the udev `input` subsystem and reports attach/remove events for
//! `/dev/input/event*` nodes. Events are forwarded as messages; all state
//! mutation happens on the orchestration loop, never in the monitor task.

use std::path::PathBuf;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_udev::{AsyncMonitorSocket, EventType, MonitorBuilder};

/// A device attach or removal notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Added { devnode: PathBuf },
    Removed { devnode: PathBuf },
}

/// Start the udev monitor task, forwarding events into `tx`.
///
/// # Errors
///
/// Returns an error if the udev monitor cannot be created. The caller is
/// expected to log this and continue without hot-plug support rather than
/// abort.
pub fn spawn_monitor(tx: mpsc::UnboundedSender<HotplugEvent>) -> Result<()> {
    let monitor = MonitorBuilder::new()
        .context("Failed to create udev monitor")?
        .match_subsystem("input")
        .context("Failed to filter udev monitor to input subsystem")?
        .listen()
        .context("Failed to listen on udev monitor")?;

    let mut socket =
        AsyncMonitorSocket::new(monitor).context("Failed to create async udev socket")?;

    tokio::spawn(async move {
        while let Some(event) = socket.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!("udev monitor error: {}", e);
                    continue;
                }
            };

            let devnode = match event.devnode() {
                Some(devnode) => devnode.to_path_buf(),
                None => continue,
            };

            if !devnode
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("event"))
                .unwrap_or(false)
            {
                continue;
            }

            let hotplug = match event.event_type() {
                EventType::Add => HotplugEvent::Added { devnode },
                EventType::Remove => HotplugEvent::Removed { devnode },
                _ => continue,
            };

            if tx.send(hotplug).is_err() {
                // Receiver gone; the daemon is shutting down
                break;
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hotplug_event_equality() {
        let a = HotplugEvent::Added {
            devnode: PathBuf::from("/dev/input/event3"),
        };
        let b = HotplugEvent::Added {
            devnode: PathBuf::from("/dev/input/event3"),
        };
        assert_eq!(a, b);

        let c = HotplugEvent::Removed {
            devnode: PathBuf::from("/dev/input/event3"),
        };
        assert_ne!(a, c);
    }
}
