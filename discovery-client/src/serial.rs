//! Serial port polling.
//!
//! Enumerates USB serial devices under `/dev` and reports the list whenever it
//! changes. On Linux, USB descriptor strings are read from sysfs when present.

use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use shared::types::PortInfo;

const DEV_DIR: &str = "/dev";
const SYSFS_TTY_DIR: &str = "/sys/class/tty";

/// Device name prefixes of USB serial adapters (Linux, then macOS)
const SERIAL_PREFIXES: &[&str] = &["ttyUSB", "ttyACM", "cu.usbmodem", "cu.usbserial"];

/// Report the serial port list on every change until `cancel` fires
pub async fn run_serial_poller(
    poll_interval: Duration,
    tx: mpsc::Sender<Vec<PortInfo>>,
    cancel: CancellationToken,
) {
    poll_dev_dir(Path::new(DEV_DIR), poll_interval, tx, cancel).await
}

async fn poll_dev_dir(
    dev_dir: &Path,
    poll_interval: Duration,
    tx: mpsc::Sender<Vec<PortInfo>>,
    cancel: CancellationToken,
) {
    tracing::info!("Starting serial port poller (poll interval: {:?})", poll_interval);

    let mut ticker = interval(poll_interval);
    let mut last: Option<Vec<PortInfo>> = None;
    let mut warned = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let ports = match list_serial_ports(dev_dir).await {
                    Ok(ports) => {
                        warned = false;
                        ports
                    }
                    Err(e) => {
                        // Hosts without a device directory fail on every tick
                        if !warned {
                            tracing::warn!("Failed to list {}: {}", dev_dir.display(), e);
                            warned = true;
                        } else {
                            tracing::trace!("Failed to list {}: {}", dev_dir.display(), e);
                        }
                        Vec::new()
                    }
                };
                if last.as_ref() == Some(&ports) {
                    continue;
                }

                tracing::debug!("Serial ports changed: {} present", ports.len());
                last = Some(ports.clone());
                if tx.send(ports).await.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!("Serial port poller shutting down");
                break;
            }
        }
    }
}

/// Serial devices found in `dev_dir`, ordered by path
pub async fn list_serial_ports(dev_dir: &Path) -> std::io::Result<Vec<PortInfo>> {
    let mut entries = tokio::fs::read_dir(dev_dir).await?;

    let mut ports = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read entry in {}: {}", dev_dir.display(), e);
                break;
            }
        };

        let name = entry.file_name().to_string_lossy().to_string();
        if !is_serial_device(&name) {
            continue;
        }

        ports.push(PortInfo {
            path: entry.path().to_string_lossy().to_string(),
            manufacturer: usb_attribute(&name, "manufacturer").await,
            serial_number: usb_attribute(&name, "serial").await,
            vendor_id: usb_attribute(&name, "idVendor").await,
            product_id: usb_attribute(&name, "idProduct").await,
            name,
        });
    }

    ports.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(ports)
}

fn is_serial_device(name: &str) -> bool {
    SERIAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// USB descriptor attribute for a tty. ACM devices expose it one level above
/// the tty's device directory, usb-serial adapters two levels above.
async fn usb_attribute(tty: &str, attribute: &str) -> Option<String> {
    let device = Path::new(SYSFS_TTY_DIR).join(tty).join("device");

    for up in [device.join("..").join(attribute), device.join("../..").join(attribute)] {
        if let Ok(value) = tokio::fs::read_to_string(&up).await {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_device_names() {
        assert!(is_serial_device("ttyUSB0"));
        assert!(is_serial_device("ttyACM1"));
        assert!(is_serial_device("cu.usbmodem14101"));
        assert!(!is_serial_device("tty0"));
        assert!(!is_serial_device("sda"));
    }

    #[tokio::test]
    async fn test_list_serial_ports_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ttyUSB1", "tty0", "ttyACM0", "null"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let ports = list_serial_ports(dir.path()).await.unwrap();
        let names: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["ttyACM0", "ttyUSB1"]);
        assert_eq!(ports[0].path, dir.path().join("ttyACM0").to_string_lossy());
    }

    #[tokio::test]
    async fn test_missing_dir_is_an_error() {
        let err = list_serial_ports(Path::new("/nonexistent/dev")).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_poller_stops_on_cancel() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_serial_poller(Duration::from_millis(10), tx, cancel.clone()));

        // First tick always reports, even an empty list
        rx.recv().await.unwrap();
        cancel.cancel();
        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_dir_reports_empty_list_once() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                poll_dev_dir(Path::new("/nonexistent/dev"), Duration::from_millis(10), tx, cancel).await
            }
        });

        assert!(rx.recv().await.unwrap().is_empty());
        // Later ticks fail the same way and report nothing new
        let again = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(again.is_err());
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap();
    }
}
