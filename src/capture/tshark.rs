//! Live capture backend: wraps a `tshark` child process restricted to the
//! Open Drone ID display filter and streams its newline-delimited JSON
//! (`-T ek`) output into [`ParsedFrame`]s. This crate never re-implements
//! the dissector itself — `tshark`'s installed `opendroneid` Lua/C
//! dissector does that; this module only shells out to it and reshapes
//! its output, the same division of labor the original capture script
//! used via `pyshark.LiveCapture`.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout};
use tracing::{error, warn};

use super::{FrameSource, OpenDroneIdFields, ParsedFrame, SourceFrame};

pub struct TsharkFrameSource {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl TsharkFrameSource {
    /// Spawns `tshark` listening on `interfaces`, restricted to frames
    /// carrying the Open Drone ID protocol.
    pub fn spawn(interfaces: &[String]) -> std::io::Result<Self> {
        let mut cmd = tokio::process::Command::new("tshark");
        for iface in interfaces {
            cmd.arg("-i").arg(iface);
        }
        cmd.args(["-Y", "opendroneid", "-T", "ek", "-l"]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().expect("stdout was piped");
        let lines = BufReader::new(stdout).lines();

        Ok(Self { child, lines })
    }
}

impl Drop for TsharkFrameSource {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

#[async_trait]
impl FrameSource for TsharkFrameSource {
    async fn next_frame(&mut self) -> Option<ParsedFrame> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    error!(error = %e, "error reading from tshark");
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(value) => {
                    if let Some(frame) = parse_ek_record(&value) {
                        return Some(frame);
                    }
                }
                Err(e) => warn!(error = %e, "malformed tshark ek record, skipping"),
            }
        }
    }
}

/// tshark's `-T ek` format interleaves an index action line with a layers
/// document; only the document carrying a `layers` object is meaningful.
fn parse_ek_record(value: &Value) -> Option<ParsedFrame> {
    let layers = value.get("layers")?;

    let epoch_time: f64 = layers
        .pointer("/frame/frame_frame_time_epoch")
        .and_then(field_str)
        .and_then(|s| s.parse().ok())?;

    let source = if let Some(addr) = layers
        .pointer("/wlan/wlan_wlan_sa_resolved")
        .and_then(field_str)
    {
        SourceFrame::WiFi {
            sa_resolved: addr.to_string(),
        }
    } else if let Some(addr) = layers
        .pointer("/btle/btle_btle_advertising_address")
        .and_then(field_str)
    {
        SourceFrame::Ble {
            advertising_address: addr.to_string(),
        }
    } else {
        return None;
    };

    let channel_hint = layers
        .pointer("/wlan_radio/wlan_radio_wlan_radio_channel")
        .and_then(field_str)
        .map(str::to_string);

    let odid_layer = layers.get("opendroneid")?;
    let opendroneid = OpenDroneIdFields {
        basicid_id_asc: odid_layer
            .pointer("/opendroneid_opendroneid_basicid_id_asc")
            .and_then(field_str)
            .map(str::to_string),
        loc_timestamp: field_i64(odid_layer, "opendroneid_opendroneid_loc_timestamp"),
        loc_direction: field_f64(odid_layer, "opendroneid_opendroneid_loc_direction"),
        loc_speed: field_f64(odid_layer, "opendroneid_opendroneid_loc_speed"),
        loc_vspeed: field_f64(odid_layer, "opendroneid_opendroneid_loc_vspeed"),
        loc_lat: field_f64(odid_layer, "opendroneid_opendroneid_loc_lat"),
        loc_lon: field_f64(odid_layer, "opendroneid_opendroneid_loc_lon"),
        loc_geoalt: field_i64(odid_layer, "opendroneid_opendroneid_loc_geoalt"),
        loc_vaccuracy: field_i64(odid_layer, "opendroneid_opendroneid_loc_vaccuracy"),
        loc_speedaccuracy: field_i64(odid_layer, "opendroneid_opendroneid_loc_speedaccuracy"),
        loc_haccuracy: field_i64(odid_layer, "opendroneid_opendroneid_loc_haccuracy"),
        loc_pressalt: field_i64(odid_layer, "opendroneid_opendroneid_loc_pressalt"),
        loc_baroaccuracy: field_i64(odid_layer, "opendroneid_opendroneid_loc_baroaccuracy"),
        loc_height: field_i64(odid_layer, "opendroneid_opendroneid_loc_height"),
        loc_flag_heighttype: field_i64(odid_layer, "opendroneid_opendroneid_loc_flag_heighttype")
            .map(|v| v as i32),
    };

    Some(ParsedFrame {
        source,
        epoch_time,
        opendroneid: Some(opendroneid),
        channel_hint,
    })
}

fn field_str(value: &Value) -> Option<&str> {
    value.as_str()
}

fn field_i64(layer: &Value, key: &str) -> Option<i64> {
    let v = layer.get(key)?;
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn field_f64(layer: &Value, key: &str) -> Option<f64> {
    let v = layer.get(key)?;
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}
