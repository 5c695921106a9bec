//! Channel Sweeper — cycles the armed monitor-mode interface through a
//! fixed schedule of Wi-Fi channels, tallying which channels are yielding
//! Remote ID traffic.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{ChannelError, InterfaceError};
use crate::interface;
use crate::signals::Signal;

/// One entry in the channel sweep: a channel number and how long to dwell
/// on it before hopping to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDwell {
    pub channel: &'static str,
    pub dwell: Duration,
}

/// An ordered, mutable list of channels to sweep, plus a running hit count
/// per channel across the device's full supported range.
pub struct ChannelSchedule {
    entries: Vec<ChannelDwell>,
    supported: Vec<String>,
    hit_counts: HashMap<String, u64>,
}

impl ChannelSchedule {
    /// The default linear sweep: a full pass through the non-overlapping
    /// 2.4 GHz and 5 GHz channels, revisiting 1/6/11 twice per cycle with
    /// channels 6 and 11 held open longer to catch slower advertisers.
    fn default_entries() -> Vec<ChannelDwell> {
        vec![
            ChannelDwell { channel: "1", dwell: Duration::from_millis(500) },
            ChannelDwell { channel: "6", dwell: Duration::from_millis(20_500) },
            ChannelDwell { channel: "11", dwell: Duration::from_millis(500) },
            ChannelDwell { channel: "36", dwell: Duration::from_millis(250) },
            ChannelDwell { channel: "40", dwell: Duration::from_millis(250) },
            ChannelDwell { channel: "44", dwell: Duration::from_millis(250) },
            ChannelDwell { channel: "48", dwell: Duration::from_millis(250) },
            ChannelDwell { channel: "1", dwell: Duration::from_millis(500) },
            ChannelDwell { channel: "6", dwell: Duration::from_millis(20_500) },
            ChannelDwell { channel: "11", dwell: Duration::from_millis(500) },
            ChannelDwell { channel: "149", dwell: Duration::from_millis(250) },
            ChannelDwell { channel: "153", dwell: Duration::from_millis(250) },
            ChannelDwell { channel: "157", dwell: Duration::from_millis(250) },
            ChannelDwell { channel: "161", dwell: Duration::from_millis(250) },
        ]
    }

    /// All Wi-Fi channels this device could ever observe, independent of
    /// which ones are currently in the active sweep.
    fn all_trackable_channels() -> Vec<String> {
        let mut channels: Vec<String> = (1..=13).map(|c| c.to_string()).collect();
        channels.extend([36, 40, 44, 48].iter().map(|c| c.to_string()));
        channels.extend([149, 153, 157, 161].iter().map(|c| c.to_string()));
        channels
    }

    /// Builds the default schedule, intersected with the channels the
    /// interface actually reports as supported (spec.md §4.1 step 7):
    /// an entry for a channel the radio doesn't support is dropped before
    /// the sweeper ever sets it.
    pub fn new(supported: Vec<String>) -> Self {
        let hit_counts = Self::all_trackable_channels()
            .into_iter()
            .map(|c| (c, 0))
            .collect();
        let entries = Self::default_entries()
            .into_iter()
            .filter(|entry| supported.iter().any(|c| c == entry.channel))
            .collect();
        Self {
            entries,
            supported,
            hit_counts,
        }
    }

    pub fn entries(&self) -> &[ChannelDwell] {
        &self.entries
    }

    /// Drains pending channel-hit notifications from the packet capture
    /// task and folds them into the per-channel counters.
    pub fn drain_hits(&mut self, hits: &mut mpsc::Receiver<String>) {
        while let Ok(channel) = hits.try_recv() {
            *self.hit_counts.entry(channel).or_insert(0) += 1;
        }
    }

    pub fn hit_count(&self, channel: &str) -> u64 {
        self.hit_counts.get(channel).copied().unwrap_or(0)
    }

    pub fn reset_hit_counts(&mut self) {
        for count in self.hit_counts.values_mut() {
            *count = 0;
        }
    }

    /// Drops a channel from both the active sweep and the supported list,
    /// used when the interface rejects it as illegal or invalid.
    pub fn remove_channel(&mut self, channel: &str) {
        self.supported.retain(|c| c != channel);
        self.entries.retain(|e| e.channel != channel);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runs the channel sweeper until `sleep` is raised or a fatal interface
/// condition occurs.
pub async fn run_channel_sweeper(
    mon: String,
    mut schedule: ChannelSchedule,
    mut channel_hits: mpsc::Receiver<String>,
    sleep: Signal,
) -> Result<(), InterfaceError> {
    if schedule.entries().is_empty() {
        return Err(InterfaceError::NoSupportedChannels { interface: mon });
    }

    while !sleep.is_set() {
        let entries = schedule.entries().to_vec();
        for entry in entries {
            if sleep.is_set() {
                break;
            }
            match interface::set_channel(&mon, entry.channel) {
                Ok(()) => {}
                Err(ChannelError::IllegalChannel(ch)) => {
                    error!(channel = %ch, "removing illegal channel from sweep");
                    schedule.remove_channel(&ch);
                    continue;
                }
                Err(ChannelError::InvalidChannelNumber(ch)) => {
                    error!(channel = %ch, "invalid channel number, removing from sweep");
                    schedule.remove_channel(&ch);
                    continue;
                }
                Err(ChannelError::InterfaceNoLongerInMonitorMode(iface)) => {
                    return Err(InterfaceError::MonitorSetupFailed {
                        interface: iface,
                        reason: "interface dropped out of monitor mode".to_string(),
                    });
                }
                Err(ChannelError::InsufficientPrivilege) => {
                    return Err(InterfaceError::InsufficientPrivilege);
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(entry.dwell) => {}
                () = sleep.wait() => break,
            }
        }
        schedule.drain_hits(&mut channel_hits);
        if schedule.is_empty() {
            warn!("channel sweep exhausted all channels");
            return Err(InterfaceError::NoSupportedChannels {
                interface: mon,
            });
        }
    }
    info!("sleep signal received, stopping channel sweeper");
    Ok(())
}
