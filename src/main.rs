//! cursed-remoteid — an always-on edge receiver for Remote ID drone
//! broadcasts.
//!
//! Four long-running tasks cooperate over bounded queues: the Channel
//! Sweeper arms the wireless adapter and hops it through a fixed channel
//! schedule, Packet Capture pulls dissected frames off the air and
//! validates them, the CSV Batcher rolls validated records into
//! size/time-bounded windows, and the Uploader ships finished windows to
//! object storage.

use anyhow::{Context, Result};
use clap::Parser;
use cursed_remoteid::capture::{self, TsharkFrameSource};
use cursed_remoteid::config::{CliArgs, RuntimeConfig};
use cursed_remoteid::error::InterfaceError;
use cursed_remoteid::signals::Signal;
use cursed_remoteid::{batcher, interface, sweep, uploader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Task identification for supervisor logging.
#[derive(Debug, Clone, Copy)]
enum TaskName {
    ChannelSweeper,
    BluetoothHandoff,
    PacketCapture,
    CsvBatcher,
    Uploader,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::ChannelSweeper => write!(f, "ChannelSweeper"),
            TaskName::BluetoothHandoff => write!(f, "BluetoothHandoff"),
            TaskName::PacketCapture => write!(f, "PacketCapture"),
            TaskName::CsvBatcher => write!(f, "CsvBatcher"),
            TaskName::Uploader => write!(f, "Uploader"),
        }
    }
}

fn init_logging(args: &CliArgs) {
    let filter = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

/// Arms the Wi-Fi adapter in monitor mode and builds its channel schedule.
/// Blocking: shells out to `airmon-ng`/`iw`, so this runs on a blocking
/// thread rather than the async executor.
fn arm_wifi_interface() -> Result<(String, sweep::ChannelSchedule), InterfaceError> {
    let armed = interface::setup_wifi_interface()?;
    let supported = interface::get_supported_channel_list(&armed.phy, &armed.mon)?;
    let schedule = sweep::ChannelSchedule::new(supported);
    Ok((armed.mon, schedule))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(&args);

    info!("cursed-remoteid starting up");

    let config = RuntimeConfig::from_args(&args).context("invalid CLI configuration")?;

    if config.check_requirements {
        interface::check_requirements().context("required utility or dissector missing")?;
    } else {
        warn!("skipping startup requirements check");
    }

    let sleep = Signal::new();
    let sigint = Signal::new();
    let csv_writer_exit = Signal::new();
    let cancel = CancellationToken::new();

    let (wifi_tx, mut wifi_rx) = mpsc::channel::<String>(config.interface_handoff_depth);
    let (bt_tx, mut bt_rx) = mpsc::channel::<String>(config.interface_handoff_depth);
    let (channel_hit_tx, channel_hit_rx) = mpsc::channel::<String>(config.channel_hit_queue_depth);
    let (record_tx, record_rx) = mpsc::channel(config.record_queue_depth);
    let (upload_tx, upload_rx) = mpsc::channel(config.upload_queue_depth);

    let mut tasks: JoinSet<Result<TaskName>> = JoinSet::new();

    if config.use_wifi {
        let sleep = sleep.clone();
        tasks.spawn(async move {
            let (mon, schedule) = tokio::task::spawn_blocking(arm_wifi_interface)
                .await
                .context("channel sweeper setup task panicked")?
                .context("failed to arm Wi-Fi monitor-mode interface")?;

            if wifi_tx.send(mon.clone()).await.is_err() {
                return Err(anyhow::anyhow!("packet capture task was not listening for the interface handoff"));
            }

            sweep::run_channel_sweeper(mon, schedule, channel_hit_rx, sleep)
                .await
                .context("channel sweeper exited with a fatal error")?;
            Ok(TaskName::ChannelSweeper)
        });
    }

    if config.use_bt {
        tasks.spawn(async move {
            let _ = bt_tx.send(interface::BLUETOOTH_INTERFACE_NAME.to_string()).await;
            Ok(TaskName::BluetoothHandoff)
        });
    }

    {
        let sigint = sigint.clone();
        let sleep = sleep.clone();
        let use_wifi = config.use_wifi;
        let use_bt = config.use_bt;
        let interface_timeout = config.interface_setup_timeout;
        let packet_timeout = config.capture_watchdog_timeout;
        tasks.spawn(async move {
            let interfaces = capture::wait_for_interfaces(
                use_wifi,
                use_bt,
                &mut wifi_rx,
                &mut bt_rx,
                interface_timeout,
            )
            .await;

            if interfaces.is_empty() {
                sleep.set();
                let _ = record_tx.send(None).await;
                return Err(anyhow::anyhow!("no capture interfaces came up in time"));
            }

            let source = Box::new(
                TsharkFrameSource::spawn(&interfaces).context("failed to launch tshark")?,
            );

            capture::run_packet_capture(
                source,
                record_tx,
                channel_hit_tx,
                sigint,
                sleep,
                packet_timeout,
            )
            .await;
            Ok(TaskName::PacketCapture)
        });
    }

    {
        let sleep = sleep.clone();
        let sigint = sigint.clone();
        let csv_writer_exit = csv_writer_exit.clone();
        let batcher_config = batcher::BatcherConfig {
            max_packets_per_window: config.max_packets_per_window,
            max_window_duration: config.max_window_duration,
            queue_starvation_timeout: config.batcher_queue_timeout,
            upload_queue_send_timeout: config.upload_queue_send_timeout,
        };
        let scratch_dir = batcher::scratch_directory();
        tasks.spawn(async move {
            batcher::run_csv_batcher(
                record_rx,
                upload_tx,
                sleep,
                sigint,
                csv_writer_exit,
                batcher_config,
                scratch_dir,
            )
            .await;
            Ok(TaskName::CsvBatcher)
        });
    }

    if config.upload_to_aws {
        let csv_writer_exit = csv_writer_exit.clone();
        let bucket_name = config.bucket_name.clone();
        let max_error_count = config.uploader_max_error_count;
        tasks.spawn(async move {
            let client = uploader::create_s3_client().await;
            uploader::run_uploader(
                upload_rx,
                Box::new(client),
                bucket_name,
                max_error_count,
                csv_writer_exit,
            )
            .await
            .context("uploader exceeded its error budget")?;
            Ok(TaskName::Uploader)
        });
    } else {
        info!("upload to S3 disabled, finished windows will accumulate and be dropped when the upload queue fills");
        drop(upload_rx);
    }

    // First Ctrl+C asks every task to wind down gracefully; a second one
    // force-exits in case a task is stuck on a blocking external command.
    let sigint_handle = sigint.clone();
    let sleep_handle = sleep.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("received SIGINT, requesting graceful shutdown (press Ctrl+C again to force)");
        sigint_handle.set();
        sleep_handle.set();

        tokio::signal::ctrl_c().await.ok();
        error!("received second SIGINT, forcing exit");
        std::process::exit(130);
    });

    let mut exit_code = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("supervisor: shutdown requested, waiting for tasks to finish");
                break;
            }
            result = tasks.join_next() => {
                match result {
                    Some(Ok(Ok(name))) => {
                        info!(task = %name, "task completed normally");
                    }
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "task failed with a fatal error");
                        sleep.set();
                        sigint.set();
                        exit_code = 1;
                        cancel.cancel();
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "task panicked");
                        sleep.set();
                        sigint.set();
                        exit_code = 1;
                        cancel.cancel();
                    }
                    None => {
                        info!("supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    while tasks.join_next().await.is_some() {}

    if sigint.is_set() {
        exit_code = 1;
    }

    info!("cursed-remoteid shutdown complete");
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
