//! Packet Capture — attaches to the armed interfaces, pulls frames through
//! an injected [`FrameSource`], validates each into a [`Record`], and feeds
//! the record queue. A watchdog closes the source after a sustained silence.

pub mod record;
pub mod tshark;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info};

pub use record::{OpenDroneIdFields, ParsedFrame, Record, SourceFrame, HEADER_ROW};
pub use tshark::TsharkFrameSource;

use crate::signals::Signal;

/// A source of dissected Remote ID frames. Implemented by the live
/// capture backend in production and by an in-memory fixture in tests —
/// the capture loop never depends on a real wireless adapter or `tshark`
/// process directly.
#[async_trait]
pub trait FrameSource: Send {
    /// Returns the next frame, or `None` once the source is exhausted
    /// (e.g. the underlying capture process exited).
    async fn next_frame(&mut self) -> Option<ParsedFrame>;
}

/// Waits (with a timeout) for the Wi-Fi and/or Bluetooth interface names
/// handed off by the channel sweeper / interface manager.
pub async fn wait_for_interfaces(
    use_wifi: bool,
    use_bt: bool,
    wifi_rx: &mut mpsc::Receiver<String>,
    bt_rx: &mut mpsc::Receiver<String>,
    interface_timeout: Duration,
) -> Vec<String> {
    let mut interfaces = Vec::new();

    if use_wifi {
        match tokio::time::timeout(interface_timeout, wifi_rx.recv()).await {
            Ok(Some(iface)) => interfaces.push(iface),
            Ok(None) => info!("Wi-Fi interface handoff channel closed"),
            Err(_) => error!("timed out waiting for Wi-Fi monitor mode interface to set up"),
        }
    }

    if use_bt {
        match tokio::time::timeout(interface_timeout, bt_rx.recv()).await {
            Ok(Some(iface)) => interfaces.push(iface),
            Ok(None) => info!("Bluetooth interface handoff channel closed"),
            Err(_) => error!("timed out waiting for Bluetooth monitor mode interface to set up"),
        }
    }

    interfaces
}

/// Summary counters returned when the capture loop finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub total_packet_count: u64,
    pub skipped_packet_count: u64,
}

/// Runs the capture loop until the source is exhausted, the watchdog
/// times out, or `sigint` is raised. Always sends a `None` sentinel on the
/// record queue and raises `sleep` before returning, so downstream tasks
/// are never left blocked indefinitely.
pub async fn run_packet_capture(
    mut source: Box<dyn FrameSource>,
    record_tx: mpsc::Sender<Option<Record>>,
    channel_hit_tx: mpsc::Sender<String>,
    sigint: Signal,
    sleep: Signal,
    packet_timeout: Duration,
) -> CaptureOutcome {
    let mut outcome = CaptureOutcome::default();

    info!("waiting for packets...");
    loop {
        if sigint.is_set() {
            info!("detected SIGINT, stopping packet capture");
            break;
        }

        match tokio::time::timeout(packet_timeout, source.next_frame()).await {
            Ok(Some(frame)) => {
                outcome.total_packet_count += 1;
                if let Some(channel) = frame.channel_hint.clone() {
                    let _ = channel_hit_tx.try_send(channel);
                }

                let now_epoch = chrono::Utc::now().timestamp() as f64;
                match Record::from_frame(&frame, now_epoch) {
                    Ok(record) => {
                        if record_tx.try_send(Some(record)).is_err() {
                            outcome.skipped_packet_count += 1;
                        }
                    }
                    Err(e) => {
                        info!(error = %e, "error parsing packet");
                    }
                }
            }
            Ok(None) => {
                info!("capture source exhausted");
                break;
            }
            Err(_) => {
                info!("timed out waiting for a new Remote ID packet");
                break;
            }
        }
    }

    info!(
        total = outcome.total_packet_count,
        skipped = outcome.skipped_packet_count,
        "closing packet capture"
    );

    sleep.set();
    let _ = record_tx.send(None).await;

    outcome
}
