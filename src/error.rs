//! Error taxonomy for the capture pipeline.
//!
//! Each component has its own typed error enum so callers can match on
//! fatal-vs-recoverable variants without parsing strings.

use thiserror::Error;

/// Errors raised while discovering or arming a wireless monitor-mode
/// interface. All variants here are startup-fatal.
#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("no supported wireless adapter found for driver {driver}")]
    NoAdapter { driver: String },

    #[error("insufficient privilege to configure network interface")]
    InsufficientPrivilege,

    #[error("required utility '{tool}' not found on PATH: {hint}")]
    ToolMissing { tool: String, hint: String },

    #[error("failed to arm interface {interface} in monitor mode: {reason}")]
    MonitorSetupFailed { interface: String, reason: String },

    #[error("interface {interface} has no supported channels")]
    NoSupportedChannels { interface: String },

    #[error("invalid interface name: {0}")]
    InvalidInterfaceName(String),

    #[error("missing required Open Drone ID dissector protocol: {0}")]
    MissingDissectorProtocol(String),

    #[error("external command failed: {0}")]
    CommandFailed(String),
}

/// Errors raised while sweeping wireless channels. `IllegalChannel` and
/// `InvalidChannelNumber` are recoverable (the channel is dropped from the
/// schedule); `InterfaceNoLongerInMonitorMode` is fatal.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel {0} cannot be legally used on this interface")]
    IllegalChannel(String),

    #[error("invalid channel number: {0}")]
    InvalidChannelNumber(String),

    #[error("interface {0} is no longer in monitor mode")]
    InterfaceNoLongerInMonitorMode(String),

    #[error("insufficient privilege to change channel")]
    InsufficientPrivilege,
}

/// Errors raised while extracting a `Record` from a captured frame. Always
/// recoverable — the frame is dropped and counted.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("frame does not carry the Open Drone ID protocol")]
    NotOpenDroneId,
}

/// Errors raised validating the CLI surface / runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--disable-wifi and --disable-bt cannot both be set: at least one radio must remain enabled")]
    NoRadiosEnabled,
}

/// Errors raised uploading a finished CSV artifact to object storage.
/// Always recoverable up to the configured error budget.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("object store rejected upload: {0}")]
    Rejected(
        #[from]
        aws_smithy_runtime_api::client::result::SdkError<
            aws_sdk_s3::operation::put_object::PutObjectError,
            aws_smithy_runtime_api::http::Response,
        >,
    ),

    #[error("local file {0} does not exist")]
    FileMissing(std::path::PathBuf),

    #[error("failed to stream local file into an upload body: {0}")]
    ByteStream(#[from] aws_smithy_types::byte_stream::error::Error),

    #[error("exceeded maximum allowed upload errors ({count})")]
    ErrorBudgetExceeded { count: u32 },
}
