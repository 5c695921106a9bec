//! Interface Manager — discovers and arms the monitor-mode Wi-Fi adapter
//! (and names the Bluetooth capture interface) once at startup, then hands
//! the interface names off to the rest of the pipeline.

use std::process::Command;

use once_cell_regex::phy_pattern;
use once_cell_regex::mon_pattern;
use tracing::{error, info};

use crate::error::InterfaceError;

mod once_cell_regex {
    use regex::Regex;
    use std::sync::OnceLock;

    pub fn phy_pattern() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"^phy\d+$").expect("static regex"))
    }

    pub fn mon_pattern() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"^wlan[0-9]+(mon)?$").expect("static regex"))
    }
}

/// The driver name the original codebase's hardware targets. Kept
/// configurable rather than hardcoded in case of a future adapter swap.
const WIFI_CARD_DRIVER: &str = "mt76x0u";

/// The physical and monitor-mode interface names of an armed Wi-Fi adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiInterface {
    pub phy: String,
    pub mon: String,
}

/// Validates a physical interface name (`phy0`, `phy12`, ...).
pub fn sanitize_phy_name(name: &str) -> Result<String, InterfaceError> {
    let name = name.trim();
    if phy_pattern().is_match(name) {
        Ok(name.to_string())
    } else {
        Err(InterfaceError::InvalidInterfaceName(name.to_string()))
    }
}

/// Validates a monitor-mode interface name (`wlan0`, `wlan0mon`, ...).
pub fn sanitize_mon_name(name: &str) -> Result<String, InterfaceError> {
    let name = name.trim();
    if mon_pattern().is_match(name) {
        Ok(name.to_string())
    } else {
        Err(InterfaceError::InvalidInterfaceName(name.to_string()))
    }
}

/// Checks that a command-line utility is resolvable on `PATH`, via the
/// `which` binary (debianutils, present on Debian/Raspberry Pi OS by
/// default) rather than the `command` shell builtin — there is no
/// `/usr/bin/command` to spawn on the target hardware.
fn check_tool_installed(tool: &str, hint: &str) -> Result<(), InterfaceError> {
    info!(tool, "checking utility installation");
    let output = Command::new("which").arg(tool).output();
    let missing = || InterfaceError::ToolMissing {
        tool: tool.to_string(),
        hint: hint.to_string(),
    };
    match output {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(missing()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(missing()),
        Err(e) => Err(InterfaceError::CommandFailed(e.to_string())),
    }
}

/// Confirms `iw`, `airmon-ng`, and `tshark` are installed, and that the
/// sniffer's Open Drone ID dissector exposes the message fields this crate
/// depends on.
pub fn check_requirements() -> Result<(), InterfaceError> {
    check_tool_installed("iw", "Try 'sudo apt install iw'.")?;
    check_tool_installed("airmon-ng", "Try 'sudo apt install aircrack-ng'.")?;
    check_tool_installed(
        "tshark",
        "Try 'sudo apt install tshark'. If Wireshark is already installed, \
         try adding the tshark binary executable to PATH.",
    )?;

    info!("checking Open Drone ID dissector installation");
    let output = Command::new("tshark")
        .args(["-G", "protocols"])
        .output()
        .map_err(|e| InterfaceError::CommandFailed(e.to_string()))?;
    let listing = String::from_utf8_lossy(&output.stdout);

    const CRITICAL: [&str; 4] = [
        "opendroneid",
        "opendroneid.message.basicid",
        "opendroneid.message.location",
        "opendroneid.message.pack",
    ];
    const OPTIONAL: [&str; 4] = [
        "opendroneid.message.authentication",
        "opendroneid.message.operatorid",
        "opendroneid.message.system",
        "opendroneid.message.selfid",
    ];

    for protocol in CRITICAL {
        if !listing.contains(protocol) {
            return Err(InterfaceError::MissingDissectorProtocol(
                protocol.to_string(),
            ));
        }
        info!(protocol, "found Open Drone ID protocol");
    }
    for protocol in OPTIONAL {
        if listing.contains(protocol) {
            info!(protocol, "found optional protocol");
        } else {
            tracing::warn!(protocol, "missing optional protocol");
        }
    }

    Ok(())
}

/// Reads back the physical wireless interface name bound to a monitor-mode
/// interface, from `/sys/class/net/<mon>/phy80211/name`.
fn read_bound_phy_name(mon: &str) -> Result<String, InterfaceError> {
    let path = format!("/sys/class/net/{mon}/phy80211/name");
    std::fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|_| InterfaceError::MonitorSetupFailed {
            interface: mon.to_string(),
            reason: format!("{path} does not exist"),
        })
}

/// Returns the list of channels a monitor-mode interface supports, parsed
/// from `iw phy <phy> channels`.
pub fn get_supported_channel_list(phy: &str, mon: &str) -> Result<Vec<String>, InterfaceError> {
    let phy = sanitize_phy_name(phy)?;
    let mon = sanitize_mon_name(mon)?;

    let bound = read_bound_phy_name(&mon)?;
    if bound != phy {
        return Err(InterfaceError::MonitorSetupFailed {
            interface: mon,
            reason: format!("expected phy {phy} but interface reports {bound}"),
        });
    }

    let output = Command::new("sudo")
        .args(["iw", "phy", &phy, "channels"])
        .output()
        .map_err(|e| InterfaceError::CommandFailed(e.to_string()))?;
    let text = String::from_utf8_lossy(&output.stdout);

    // Each supported channel line looks like "* 2412 MHz [1] (20.0 dBm)" —
    // the channel number is the first bracketed token.
    let mut channels = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split(['[', ']']).collect();
        if fields.len() > 2 {
            channels.push(fields[1].to_string());
        }
    }

    if channels.is_empty() {
        return Err(InterfaceError::NoSupportedChannels { interface: mon });
    }
    info!(?channels, "supported channel list");
    Ok(channels)
}

/// Tunes the given monitor-mode interface to the given channel.
pub fn set_channel(mon: &str, channel: &str) -> Result<(), crate::error::ChannelError> {
    use crate::error::ChannelError;

    let mon = sanitize_mon_name(mon)
        .map_err(|_| ChannelError::InvalidChannelNumber(mon.to_string()))?;

    if !channel.chars().all(|c| c.is_ascii_digit()) {
        return Err(ChannelError::InvalidChannelNumber(channel.to_string()));
    }

    let output = Command::new("sudo")
        .args(["iw", "dev", &mon, "set", "channel", channel])
        .output()
        .map_err(|e| ChannelError::InvalidChannelNumber(e.to_string()))?;

    if output.status.success() {
        return Ok(());
    }

    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    error!(channel, %combined, "failed to switch channel");
    if combined.contains("(-1)") {
        Err(ChannelError::InsufficientPrivilege)
    } else if combined.contains("(-16)") {
        Err(ChannelError::InterfaceNoLongerInMonitorMode(mon))
    } else if combined.contains("(-22)") {
        Err(ChannelError::IllegalChannel(channel.to_string()))
    } else {
        Err(ChannelError::InvalidChannelNumber(channel.to_string()))
    }
}

/// Kills interfering network processes, discovers the configured adapter
/// driver, and arms it in monitor mode. Returns the physical and monitor
/// interface names on success.
pub fn setup_wifi_interface() -> Result<WifiInterface, InterfaceError> {
    info!("killing interfering network processes");
    let check_kill = Command::new("sudo")
        .args(["airmon-ng", "check", "kill"])
        .output()
        .map_err(|e| InterfaceError::CommandFailed(e.to_string()))?;
    if !check_kill.status.success() {
        let stderr = String::from_utf8_lossy(&check_kill.stderr);
        if stderr.contains("a password is required") {
            return Err(InterfaceError::InsufficientPrivilege);
        }
        return Err(InterfaceError::CommandFailed(stderr.to_string()));
    }

    info!(driver = WIFI_CARD_DRIVER, "checking for available interfaces");
    let listing = Command::new("sudo")
        .arg("airmon-ng")
        .output()
        .map_err(|e| InterfaceError::CommandFailed(e.to_string()))?;
    let listing_text = String::from_utf8_lossy(&listing.stdout);

    // `airmon-ng`'s listing is column-formatted; collapse each matching
    // line's whitespace to single spaces before regex matching, the
    // equivalent of the original's `awk '/driver/{print $1,$2}'` filter.
    let normalized: String = listing_text
        .lines()
        .filter(|line| line.contains(WIFI_CARD_DRIVER))
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n");

    let discovery = phy_mon_pattern().find(&normalized);
    let (phy_name, mon_name) = match discovery {
        Some(m) => {
            let caps = phy_mon_pattern().captures(m.as_str()).expect("match implies captures");
            (caps[1].to_string(), caps[2].to_string())
        }
        None => {
            return Err(InterfaceError::NoAdapter {
                driver: WIFI_CARD_DRIVER.to_string(),
            })
        }
    };
    info!(phy = %phy_name, mon = %mon_name, "found candidate interface");

    info!(mon = %mon_name, "starting monitor mode");
    let start = Command::new("sudo")
        .args(["airmon-ng", "start", &mon_name])
        .output()
        .map_err(|e| InterfaceError::CommandFailed(e.to_string()))?;
    let start_text = String::from_utf8_lossy(&start.stdout);
    if !start.status.success() || start_text.contains("No such device") {
        return Err(InterfaceError::MonitorSetupFailed {
            interface: mon_name,
            reason: start_text.to_string(),
        });
    }

    let confirm = monitor_confirm_pattern().captures(&start_text).ok_or_else(|| {
        InterfaceError::MonitorSetupFailed {
            interface: mon_name.clone(),
            reason: "could not confirm monitor-mode interface name".to_string(),
        }
    })?;
    if &confirm[1] != phy_name {
        return Err(InterfaceError::MonitorSetupFailed {
            interface: mon_name,
            reason: format!("expected phy {phy_name} but found {}", &confirm[1]),
        });
    }
    let armed_mon = confirm[2].to_string();
    info!(phy = %phy_name, mon = %armed_mon, "armed monitor mode");

    Ok(WifiInterface {
        phy: phy_name,
        mon: armed_mon,
    })
}

fn phy_mon_pattern() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(phy\d+) (wlan\d+(?:mon)?|wlx[0-9a-zA-Z]{12})").expect("static regex")
    })
}

fn monitor_confirm_pattern() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\[(phy\d+)\](wlan\d+mon)").expect("static regex"))
}

/// Name used for the Bluetooth Remote ID capture interface. Bluetooth
/// channels are all captured simultaneously, so there is no per-channel
/// sweep to run for this interface.
pub const BLUETOOTH_INTERFACE_NAME: &str = "bluetooth-monitor";
