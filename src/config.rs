//! Command-line surface and runtime configuration. `RuntimeConfig` is built
//! once at startup from parsed CLI flags and threaded explicitly into each
//! task as an argument, rather than read back from a process-wide global
//! (spec.md §9's "process-wide globals as explicit dependency struct" hint).

use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

/// Remote ID packet capture script.
#[derive(Parser, Debug)]
#[command(name = "cursed-remoteid")]
#[command(about = "Remote ID packet capture script.")]
#[command(version)]
pub struct CliArgs {
    /// Enable verbose console logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable debug-level logging (takes priority over --verbose).
    #[arg(long)]
    pub debug: bool,

    /// Log file location.
    #[arg(long, default_value = "logs/debug.log")]
    pub log_file: String,

    /// Disable Wi-Fi Remote ID capture.
    #[arg(long)]
    pub disable_wifi: bool,

    /// Disable Bluetooth Remote ID capture.
    #[arg(long)]
    pub disable_bt: bool,

    /// Upload finished CSV artifacts to Amazon S3.
    #[arg(long, overrides_with = "no_upload_to_aws")]
    pub upload_to_aws: bool,

    /// Skip uploading finished CSV artifacts.
    #[arg(long, overrides_with = "upload_to_aws")]
    pub no_upload_to_aws: bool,

    /// Amazon S3 bucket name.
    #[arg(long, default_value = "cursed-remoteid-data")]
    pub bucket_name: String,

    /// Skip the startup check for required command-line utilities.
    #[arg(long)]
    pub no_check_requirements: bool,
}

impl CliArgs {
    /// Resolves the `--upload-to-aws`/`--no-upload-to-aws` pair into a
    /// single decision. Upload is off by default, matching the original's
    /// `BooleanOptionalAction` with no default.
    pub fn should_upload(&self) -> bool {
        self.upload_to_aws && !self.no_upload_to_aws
    }
}

/// Process-wide settings derived from CLI flags and fixed defaults, read by
/// every task. Initialized once at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub use_wifi: bool,
    pub use_bt: bool,
    pub upload_to_aws: bool,
    pub bucket_name: String,
    pub check_requirements: bool,

    pub interface_handoff_depth: usize,
    pub record_queue_depth: usize,
    pub channel_hit_queue_depth: usize,
    pub upload_queue_depth: usize,

    pub interface_setup_timeout: Duration,
    /// Packet Capture's watchdog: no frame at all for this long means the
    /// sniffer is hung (spec default 900s).
    pub capture_watchdog_timeout: Duration,
    pub sleep_timeout: Duration,

    pub max_packets_per_window: u32,
    pub max_window_duration: Duration,
    /// CSV Batcher's queue-starvation timeout: no record for this long
    /// rolls the current window over even below the packet/duration
    /// thresholds (spec default 120s).
    pub batcher_queue_timeout: Duration,
    pub upload_queue_send_timeout: Duration,
    pub uploader_max_error_count: u32,
}

impl RuntimeConfig {
    /// Builds the runtime configuration from parsed CLI flags.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoRadiosEnabled`] if both `--disable-wifi` and
    /// `--disable-bt` are set — spec.md §6 requires at least one radio to
    /// remain enabled.
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        if args.disable_wifi && args.disable_bt {
            return Err(ConfigError::NoRadiosEnabled);
        }

        Ok(Self {
            use_wifi: !args.disable_wifi,
            use_bt: !args.disable_bt,
            upload_to_aws: args.should_upload(),
            bucket_name: args.bucket_name.clone(),
            check_requirements: !args.no_check_requirements,

            interface_handoff_depth: 1,
            record_queue_depth: 1000,
            channel_hit_queue_depth: 1000,
            upload_queue_depth: 10,

            interface_setup_timeout: Duration::from_secs(30),
            capture_watchdog_timeout: Duration::from_secs(900),
            sleep_timeout: Duration::from_secs(3600),

            max_packets_per_window: 100,
            max_window_duration: Duration::from_secs(300),
            batcher_queue_timeout: Duration::from_secs(120),
            upload_queue_send_timeout: Duration::from_secs(5),
            uploader_max_error_count: 5,
        })
    }
}
