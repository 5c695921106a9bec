//! CSV Batcher — accumulates validated records into size- and time-bounded
//! CSV windows, handing finished files off to the uploader.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::capture::{Record, HEADER_ROW};
use crate::signals::Signal;

/// Picks (and cleans) the scratch directory CSV windows are written into.
/// Mirrors the original's OS-dependent temp location: `/var/tmp` on POSIX,
/// the user's `AppData\Local\Temp` on Windows, falling back to `./tmp` for
/// anything else.
pub fn scratch_directory() -> PathBuf {
    let base = if cfg!(target_os = "windows") {
        std::env::var_os("LOCALAPPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("C:\\Users\\Default\\AppData\\Local"))
            .join("Temp")
    } else if cfg!(unix) {
        PathBuf::from("/var/tmp")
    } else {
        PathBuf::from("tmp")
    };
    base.join("remote-id-data")
}

/// Creates the scratch directory if needed, and deletes any leftover
/// `.csv` files from a previous run (non-recursively — only the top level
/// is swept, matching the original's single `os.walk` iteration before
/// `break`).
pub fn clean_scratch_directory(dir: &Path) -> std::io::Result<()> {
    let already_existed = dir.is_dir();
    std::fs::create_dir_all(dir)?;
    if !already_existed {
        return Ok(());
    }
    info!(?dir, "directory already exists, deleting leftover files");
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            safe_remove_csv(&path);
        }
    }
    Ok(())
}

/// Deletes a file only if it has a `.csv` extension. Refuses to delete
/// anything else, even if asked — this is the last line of defense
/// against accidentally removing an unrelated file handed to this
/// function by mistake.
pub fn safe_remove_csv(path: &Path) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some("csv") {
        error!(?path, "refusing to delete a non-csv file");
        return false;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(?path, "deleted file");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(?path, "file already gone");
            false
        }
        Err(e) => {
            error!(?path, error = %e, "failed to remove file");
            false
        }
    }
}

/// One CSV window: an open writer plus the bookkeeping needed to decide
/// when to roll it over.
struct CsvWindow {
    path: PathBuf,
    writer: csv::Writer<std::fs::File>,
    packet_count: u32,
    opened_at: Instant,
}

impl CsvWindow {
    fn open(dir: &Path) -> std::io::Result<Self> {
        let file_name = format!("remote-id-{}.csv", Uuid::new_v4());
        let path = dir.join(file_name);
        let mut writer = csv::WriterBuilder::new().from_path(&path)?;
        writer.write_record(HEADER_ROW)?;
        info!(?path, "opened csv window");
        Ok(Self {
            path,
            writer,
            packet_count: 0,
            opened_at: Instant::now(),
        })
    }

    fn write(&mut self, record: &Record) -> std::io::Result<()> {
        self.writer.write_record(record.to_csv_row())?;
        self.packet_count += 1;
        Ok(())
    }

    fn should_roll(&self, max_packets: u32, max_duration: Duration) -> bool {
        self.packet_count > max_packets || self.opened_at.elapsed() >= max_duration
    }

    fn close(mut self) -> std::io::Result<(PathBuf, u32)> {
        self.writer.flush()?;
        info!(path = ?self.path, packets = self.packet_count, "closing csv window");
        Ok((self.path, self.packet_count))
    }
}

/// Configuration for window rollover, mirroring the original's CSV writer
/// thread defaults.
#[derive(Debug, Clone, Copy)]
pub struct BatcherConfig {
    pub max_packets_per_window: u32,
    pub max_window_duration: Duration,
    /// Closes the current window and exits the batcher if no record
    /// arrives for this long, even below the packet-count/duration
    /// thresholds (spec §4.4) — starvation ends the batcher, it does not
    /// merely roll to a fresh window.
    pub queue_starvation_timeout: Duration,
    pub upload_queue_send_timeout: Duration,
}

/// Runs the batcher loop: pulls records, rolls windows over by size or
/// time, and hands finished files to the uploader. Always raises
/// `csv_writer_exit` and sends a sentinel on the upload queue before
/// returning, regardless of which path ended the loop.
pub async fn run_csv_batcher(
    mut record_rx: mpsc::Receiver<Option<Record>>,
    upload_tx: mpsc::Sender<Option<PathBuf>>,
    sleep: Signal,
    sigint: Signal,
    csv_writer_exit: Signal,
    config: BatcherConfig,
    scratch_dir: PathBuf,
) {
    if let Err(e) = clean_scratch_directory(&scratch_dir) {
        error!(error = %e, "failed to prepare scratch directory");
    }

    'outer: while !sleep.is_set() {
        let mut window = match CsvWindow::open(&scratch_dir) {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "failed to open csv window, aborting batcher");
                break;
            }
        };

        let mut starved = false;
        loop {
            if sigint.is_set() {
                break;
            }
            if window.should_roll(config.max_packets_per_window, config.max_window_duration) {
                break;
            }

            match tokio::time::timeout(config.queue_starvation_timeout, record_rx.recv()).await {
                Ok(Some(Some(record))) => {
                    if let Err(e) = window.write(&record) {
                        error!(error = %e, "failed to write record, dropping");
                    }
                }
                Ok(Some(None)) => {
                    info!("received termination message from packet queue");
                    let _ = window.close();
                    break 'outer;
                }
                Ok(None) => {
                    info!("packet queue closed");
                    let _ = window.close();
                    break 'outer;
                }
                Err(_) => {
                    info!("record queue starved, closing window and exiting batcher");
                    starved = true;
                    break;
                }
            }
        }

        if sigint.is_set() {
            info!(path = ?window.path, "SIGINT received, deleting in-progress window");
            let path = window.path.clone();
            let _ = window.close();
            safe_remove_csv(&path);
            break;
        }

        match window.close() {
            Ok((path, packet_count)) => {
                if packet_count > 0 {
                    match tokio::time::timeout(
                        config.upload_queue_send_timeout,
                        upload_tx.send(Some(path.clone())),
                    )
                    .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => info!("upload queue closed"),
                        Err(_) => {
                            error!(?path, "upload queue full, skipping file");
                            safe_remove_csv(&path);
                        }
                    }
                } else {
                    info!("removing window with no packets");
                    safe_remove_csv(&path);
                }
            }
            Err(e) => error!(error = %e, "failed to close csv window"),
        }

        if starved {
            break;
        }
    }

    info!("exiting csv batcher");
    // Exit signal is raised before the sentinel is queued so the uploader
    // never blocks indefinitely on an empty queue.
    csv_writer_exit.set();
    let _ = upload_tx.send(None).await;
}
