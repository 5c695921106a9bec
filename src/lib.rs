//! CURSED-RemoteID: an always-on edge receiver for Remote ID drone
//! broadcasts.
//!
//! ## Architecture
//!
//! - **Interface Manager** (`interface`): discovers and arms the
//!   monitor-mode Wi-Fi adapter once at startup.
//! - **Channel Sweeper** (`sweep`): cycles the armed adapter through a
//!   fixed channel schedule, tallying per-channel hit counts.
//! - **Packet Capture** (`capture`): pulls dissected frames from the
//!   capture backend and validates each into a [`capture::Record`].
//! - **CSV Batcher** (`batcher`): rolls validated records into
//!   size/time-bounded CSV windows.
//! - **Uploader** (`uploader`): ships finished windows to object storage.

pub mod batcher;
pub mod capture;
pub mod config;
pub mod error;
pub mod interface;
pub mod signals;
pub mod sweep;
pub mod uploader;

pub use capture::Record;
pub use config::{CliArgs, RuntimeConfig};
pub use error::{ChannelError, ConfigError, InterfaceError, PacketError, UploadError};
