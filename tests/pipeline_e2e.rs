//! End-to-end pipeline tests.
//!
//! Wires Packet Capture, the CSV Batcher, and the Uploader together exactly
//! as `main.rs` does, skipping only the Interface Manager / Channel Sweeper
//! (they shell out to real wireless tooling and have no place in a test
//! process). An in-memory `FrameSource` fixture stands in for a live
//! capture backend.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use cursed_remoteid::capture::{run_packet_capture, FrameSource, OpenDroneIdFields, ParsedFrame, SourceFrame};
use cursed_remoteid::{batcher, uploader};
use cursed_remoteid::signals::Signal;
use tokio::sync::mpsc;

struct FixtureSource {
    frames: VecDeque<ParsedFrame>,
}

#[async_trait]
impl FrameSource for FixtureSource {
    async fn next_frame(&mut self) -> Option<ParsedFrame> {
        self.frames.pop_front()
    }
}

fn valid_frame(channel: &str) -> ParsedFrame {
    ParsedFrame {
        source: SourceFrame::WiFi {
            sa_resolved: "aa:bb:cc:dd:ee:ff".to_string(),
        },
        epoch_time: chrono::Utc::now().timestamp() as f64,
        opendroneid: Some(OpenDroneIdFields {
            basicid_id_asc: Some("TEST-DRONE-1".to_string()),
            loc_timestamp: Some(0),
            loc_direction: Some(90.0),
            loc_speed: Some(12.0),
            loc_vspeed: Some(0.0),
            loc_lat: Some(37.0),
            loc_lon: Some(-122.0),
            loc_geoalt: Some(150),
            loc_vaccuracy: Some(1),
            loc_speedaccuracy: Some(1),
            loc_haccuracy: Some(1),
            loc_pressalt: Some(150),
            loc_baroaccuracy: Some(1),
            loc_height: Some(50),
            loc_flag_heighttype: Some(0),
        }),
        channel_hint: Some(channel.to_string()),
    }
}

fn malformed_frame() -> ParsedFrame {
    let mut frame = valid_frame("6");
    frame.opendroneid = None;
    frame
}

fn fake_s3_client() -> aws_sdk_s3::Client {
    aws_sdk_s3::Client::from_conf(
        aws_sdk_s3::config::Builder::new()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                "test", "test", None, None, "test",
            ))
            .build(),
    )
}

/// Happy path: a handful of valid frames flow from capture through the
/// batcher into a finished CSV window, ready for upload.
#[tokio::test]
async fn happy_path_produces_an_uploadable_window() {
    let tmp = tempfile::tempdir().unwrap();
    let frames: VecDeque<ParsedFrame> = (0..5).map(|_| valid_frame("6")).collect();
    let source = Box::new(FixtureSource { frames });

    let (record_tx, record_rx) = mpsc::channel(100);
    let (hit_tx, _hit_rx) = mpsc::channel(100);
    let (upload_tx, mut upload_rx) = mpsc::channel(10);

    let sleep = Signal::new();
    let sigint = Signal::new();
    let csv_writer_exit = Signal::new();

    let capture = tokio::spawn(run_packet_capture(
        source,
        record_tx,
        hit_tx,
        sigint.clone(),
        sleep.clone(),
        Duration::from_millis(100),
    ));

    let batcher_config = batcher::BatcherConfig {
        max_packets_per_window: 100,
        max_window_duration: Duration::from_secs(300),
        queue_starvation_timeout: Duration::from_secs(5),
        upload_queue_send_timeout: Duration::from_secs(1),
    };
    let batch = tokio::spawn(batcher::run_csv_batcher(
        record_rx,
        upload_tx,
        sleep.clone(),
        sigint,
        csv_writer_exit.clone(),
        batcher_config,
        tmp.path().to_path_buf(),
    ));

    let outcome = tokio::time::timeout(Duration::from_secs(2), capture)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.total_packet_count, 5);

    tokio::time::timeout(Duration::from_secs(2), batch)
        .await
        .unwrap()
        .unwrap();

    let window = upload_rx.recv().await.flatten().expect("a finished window");
    assert!(window.exists());
    let contents = std::fs::read_to_string(&window).unwrap();
    assert_eq!(contents.lines().count(), 6); // header + 5 records
}

/// A malformed frame is dropped by Packet Capture and never reaches a CSV
/// window; only the valid frames around it survive.
#[tokio::test]
async fn bad_row_is_skipped_without_stopping_the_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let frames = VecDeque::from([valid_frame("6"), malformed_frame(), valid_frame("6")]);
    let source = Box::new(FixtureSource { frames });

    let (record_tx, record_rx) = mpsc::channel(100);
    let (hit_tx, _hit_rx) = mpsc::channel(100);
    let (upload_tx, mut upload_rx) = mpsc::channel(10);

    let sleep = Signal::new();
    let sigint = Signal::new();
    let csv_writer_exit = Signal::new();

    let capture = tokio::spawn(run_packet_capture(
        source,
        record_tx,
        hit_tx,
        sigint.clone(),
        sleep.clone(),
        Duration::from_millis(100),
    ));

    let batcher_config = batcher::BatcherConfig {
        max_packets_per_window: 100,
        max_window_duration: Duration::from_secs(300),
        queue_starvation_timeout: Duration::from_secs(5),
        upload_queue_send_timeout: Duration::from_secs(1),
    };
    let batch = tokio::spawn(batcher::run_csv_batcher(
        record_rx,
        upload_tx,
        sleep,
        sigint,
        csv_writer_exit,
        batcher_config,
        tmp.path().to_path_buf(),
    ));

    let outcome = tokio::time::timeout(Duration::from_secs(2), capture)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.total_packet_count, 3);

    tokio::time::timeout(Duration::from_secs(2), batch)
        .await
        .unwrap()
        .unwrap();

    let window = upload_rx.recv().await.flatten().expect("a finished window");
    let contents = std::fs::read_to_string(&window).unwrap();
    assert_eq!(contents.lines().count(), 3); // header + 2 valid records
}

/// A window rolls over on the time boundary rather than the packet-count
/// boundary when records keep trickling in slower than the count limit
/// would ever be reached.
#[tokio::test]
async fn window_rolls_over_on_time_with_steady_trickle() {
    let tmp = tempfile::tempdir().unwrap();
    let (record_tx, record_rx) = mpsc::channel(10);
    let (upload_tx, mut upload_rx) = mpsc::channel(10);

    let sleep = Signal::new();
    let sigint = Signal::new();
    let csv_writer_exit = Signal::new();

    let batcher_config = batcher::BatcherConfig {
        max_packets_per_window: 1000,
        max_window_duration: Duration::from_millis(60),
        queue_starvation_timeout: Duration::from_secs(5),
        upload_queue_send_timeout: Duration::from_secs(1),
    };
    let batch = tokio::spawn(batcher::run_csv_batcher(
        record_rx,
        upload_tx,
        sleep.clone(),
        sigint,
        csv_writer_exit.clone(),
        batcher_config,
        tmp.path().to_path_buf(),
    ));

    let feeder = tokio::spawn(async move {
        for _ in 0..20 {
            let frame = valid_frame("6");
            let now = chrono::Utc::now().timestamp() as f64;
            let record = cursed_remoteid::Record::from_frame(&frame, now).unwrap();
            if record_tx.send(Some(record)).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sleep.set();
    });

    let window = tokio::time::timeout(Duration::from_secs(2), upload_rx.recv())
        .await
        .unwrap()
        .flatten()
        .expect("a window should roll over on the time boundary");
    assert!(window.exists());
    let packet_count = std::fs::read_to_string(&window).unwrap().lines().count() - 1;
    assert!(packet_count < 1000, "window rolled by time, not by packet count");

    let _ = tokio::time::timeout(Duration::from_secs(2), feeder).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), batch).await;
    assert!(csv_writer_exit.is_set());
}

/// Once the batcher has exited, the uploader drains whatever is left in the
/// queue and stops promptly rather than blocking forever on an empty,
/// producer-closed channel.
#[tokio::test]
async fn uploader_drains_after_batcher_exit_without_blocking() {
    let missing: PathBuf = PathBuf::from("/nonexistent/never-uploads.csv");

    let (upload_tx, upload_rx) = mpsc::channel(10);
    let csv_writer_exit = Signal::new();
    csv_writer_exit.set();

    upload_tx.send(Some(missing.clone())).await.unwrap();
    upload_tx.send(None).await.unwrap();
    drop(upload_tx);

    tokio::time::timeout(
        Duration::from_secs(2),
        uploader::run_uploader(
            upload_rx,
            Box::new(fake_s3_client()),
            "test-bucket".to_string(),
            5,
            csv_writer_exit,
        ),
    )
    .await
    .expect("uploader should drain and stop promptly once the batcher has exited")
    .unwrap();
}

/// Spec scenario #3: when the record queue is at capacity, Packet Capture
/// drops (rather than blocks on) excess frames and tallies them as skipped
/// instead of crashing or backing up forever.
#[tokio::test]
async fn backpressure_drops_excess_frames_without_crashing() {
    const QUEUE_DEPTH: usize = 1000;
    const FRAME_COUNT: usize = 2000;

    let frames: VecDeque<ParsedFrame> = (0..FRAME_COUNT).map(|_| valid_frame("6")).collect();
    let source = Box::new(FixtureSource { frames });

    let (record_tx, mut record_rx) = mpsc::channel(QUEUE_DEPTH);
    let (hit_tx, _hit_rx) = mpsc::channel(100);

    let capture = tokio::spawn(run_packet_capture(
        source,
        record_tx,
        hit_tx,
        Signal::new(),
        Signal::new(),
        Duration::from_millis(200),
    ));

    // Nothing drains the queue until the whole burst has been offered, so
    // capacity genuinely fills and the excess is dropped rather than
    // consumed as fast as it arrives; the loop's final sentinel send still
    // needs somewhere to land, which this drain provides once capture
    // yields to it.
    let drain = tokio::spawn(async move { while record_rx.recv().await.is_some() {} });

    let outcome = tokio::time::timeout(Duration::from_secs(5), capture)
        .await
        .expect("capture should not hang under backpressure")
        .unwrap();

    assert_eq!(outcome.total_packet_count, FRAME_COUNT as u64);
    assert!(
        outcome.skipped_packet_count >= (FRAME_COUNT - QUEUE_DEPTH) as u64,
        "expected at least {} frames dropped, got {}",
        FRAME_COUNT - QUEUE_DEPTH,
        outcome.skipped_packet_count
    );

    let _ = tokio::time::timeout(Duration::from_secs(2), drain).await;
}

/// Spec scenario #6: raising `sigint` while a window is open deletes the
/// partial CSV file and never enqueues it for upload, rather than shipping
/// a truncated window.
#[tokio::test]
async fn sigint_mid_window_deletes_partial_file_without_enqueuing() {
    let tmp = tempfile::tempdir().unwrap();
    let (record_tx, record_rx) = mpsc::channel(10);
    let (upload_tx, mut upload_rx) = mpsc::channel(10);

    let sleep = Signal::new();
    let sigint = Signal::new();
    let csv_writer_exit = Signal::new();

    let config = batcher::BatcherConfig {
        max_packets_per_window: 1000,
        max_window_duration: Duration::from_secs(300),
        queue_starvation_timeout: Duration::from_millis(100),
        upload_queue_send_timeout: Duration::from_secs(1),
    };

    let batch = tokio::spawn(batcher::run_csv_batcher(
        record_rx,
        upload_tx,
        sleep,
        sigint.clone(),
        csv_writer_exit.clone(),
        config,
        tmp.path().to_path_buf(),
    ));

    let frame = valid_frame("6");
    let now = chrono::Utc::now().timestamp() as f64;
    let record = cursed_remoteid::Record::from_frame(&frame, now).unwrap();
    record_tx.send(Some(record)).await.unwrap();

    // Give the batcher time to write the record into the open window, then
    // raise sigint well inside the starvation window so the next loop
    // iteration observes it rather than rolling the window over normally.
    tokio::time::sleep(Duration::from_millis(20)).await;
    sigint.set();

    tokio::time::timeout(Duration::from_secs(2), batch)
        .await
        .expect("batcher should exit promptly on sigint")
        .unwrap();
    assert!(csv_writer_exit.is_set());

    let sentinel = tokio::time::timeout(Duration::from_millis(500), upload_rx.recv())
        .await
        .expect("upload queue should receive the termination sentinel");
    assert_eq!(sentinel, Some(None), "partial window must never be enqueued for upload");

    let leftover_csvs = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some("csv"))
        .count();
    assert_eq!(leftover_csvs, 0, "partial window file must be deleted from disk");
}

struct AlwaysFailingStore;

#[async_trait]
impl uploader::ObjectStore for AlwaysFailingStore {
    async fn put(&self, path: &std::path::Path, _bucket: &str) -> Result<(), cursed_remoteid::UploadError> {
        Err(cursed_remoteid::UploadError::FileMissing(path.to_path_buf()))
    }
}

/// Spec scenario #5: once the uploader's error budget is exhausted, the
/// whole pipeline treats it as fatal rather than continuing to retry
/// forever against an unreachable or misconfigured bucket.
#[tokio::test]
async fn upload_failure_budget_ends_the_pipeline_fatally() {
    let tmp = tempfile::tempdir().unwrap();
    let frames: VecDeque<ParsedFrame> = (0..3).map(|_| valid_frame("6")).collect();
    let source = Box::new(FixtureSource { frames });

    let (record_tx, record_rx) = mpsc::channel(100);
    let (hit_tx, _hit_rx) = mpsc::channel(100);
    let (upload_tx, upload_rx) = mpsc::channel(10);

    let sleep = Signal::new();
    let sigint = Signal::new();
    let csv_writer_exit = Signal::new();

    let capture = tokio::spawn(run_packet_capture(
        source,
        record_tx,
        hit_tx,
        sigint.clone(),
        sleep.clone(),
        Duration::from_millis(100),
    ));

    let batcher_config = batcher::BatcherConfig {
        max_packets_per_window: 1,
        max_window_duration: Duration::from_secs(300),
        queue_starvation_timeout: Duration::from_secs(5),
        upload_queue_send_timeout: Duration::from_secs(1),
    };
    let batch = tokio::spawn(batcher::run_csv_batcher(
        record_rx,
        upload_tx,
        sleep,
        sigint,
        csv_writer_exit.clone(),
        batcher_config,
        tmp.path().to_path_buf(),
    ));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        uploader::run_uploader(
            upload_rx,
            Box::new(AlwaysFailingStore),
            "test-bucket".to_string(),
            2,
            csv_writer_exit,
        ),
    )
    .await
    .expect("uploader should not hang");

    assert!(matches!(
        result,
        Err(cursed_remoteid::UploadError::ErrorBudgetExceeded { count: 2 })
    ));

    tokio::time::timeout(Duration::from_secs(2), capture).await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(2), batch).await.unwrap().unwrap();
}
