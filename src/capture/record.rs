//! The normalized Remote ID telemetry record extracted from one captured
//! frame, and the validation/coercion rules used to build it.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::error::PacketError;

fn src_addr_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:MAC|BDA)-(?:[0-9A-F]{2}:){5}[0-9A-F]{2}$").expect("static regex")
    })
}

fn unique_id_strip_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^0-9a-zA-Z_\- ]+").expect("static regex"))
}

/// Which radio carried the frame.
#[derive(Debug, Clone)]
pub enum SourceFrame {
    WiFi { sa_resolved: String },
    Ble { advertising_address: String },
}

/// The Open Drone ID message-pack fields a dissector exposes on a matching
/// frame. Optional fields are genuinely optional in the protocol; absence
/// is represented as `None` rather than defaulted away before validation.
#[derive(Debug, Clone, Default)]
pub struct OpenDroneIdFields {
    pub basicid_id_asc: Option<String>,
    pub loc_timestamp: Option<i64>,
    pub loc_direction: Option<f64>,
    pub loc_speed: Option<f64>,
    pub loc_vspeed: Option<f64>,
    pub loc_lat: Option<f64>,
    pub loc_lon: Option<f64>,
    pub loc_geoalt: Option<i64>,
    pub loc_vaccuracy: Option<i64>,
    pub loc_speedaccuracy: Option<i64>,
    pub loc_haccuracy: Option<i64>,
    pub loc_pressalt: Option<i64>,
    pub loc_baroaccuracy: Option<i64>,
    pub loc_height: Option<i64>,
    pub loc_flag_heighttype: Option<i32>,
}

/// A frame as handed to this crate by the capture backend: source radio,
/// frame epoch time, and (if present) the dissected Open Drone ID fields.
#[derive(Debug, Clone)]
pub struct ParsedFrame {
    pub source: SourceFrame,
    pub epoch_time: f64,
    pub opendroneid: Option<OpenDroneIdFields>,
    /// The Wi-Fi channel the capture backend was tuned to when this frame
    /// arrived, if known. Fed back to the channel sweeper's hit counters.
    pub channel_hint: Option<String>,
}

/// One validated, normalized row of Remote ID telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub src_addr: String,
    pub unique_id: String,
    pub timestamp: String,
    pub heading: f64,
    pub gnd_speed: f64,
    pub vert_speed: f64,
    pub lat: f64,
    pub lon: f64,
    pub geo_alt: i64,
    pub speed_acc: i64,
    pub horz_acc: i64,
    pub geo_vert_acc: i64,
    pub baro_alt: f64,
    pub baro_alt_acc: i64,
    pub height: f64,
    pub height_type: i32,
}

pub const HEADER_ROW: [&str; 16] = [
    "Source Address",
    "Unique ID",
    "Timestamp",
    "Heading",
    "Ground Speed",
    "Vertical Speed",
    "Latitude",
    "Longitude",
    "Geodetic Altitude",
    "Speed Accuracy",
    "Horizontal Accuracy",
    "Geodetic Vertical Accuracy",
    "Barometric Altitude",
    "Barometric Altitude Accuracy",
    "Height",
    "Height Type",
];

impl Record {
    /// Builds a validated record from a dissected frame, clamping the
    /// reconstructed timestamp to `now_epoch` (seconds since the Unix
    /// epoch) so a drone transmitting without GPS lock cannot produce a
    /// row that appears to be from the future.
    pub fn from_frame(frame: &ParsedFrame, now_epoch: f64) -> Result<Self, PacketError> {
        let src_addr = extract_src_addr(&frame.source)?;

        let odid = frame
            .opendroneid
            .as_ref()
            .ok_or(PacketError::NotOpenDroneId)?;

        let unique_id = extract_unique_id(odid)?;
        let timestamp = extract_timestamp(frame.epoch_time, odid, now_epoch)?;

        let heading = odid.loc_direction.ok_or(PacketError::MissingField("heading"))?;
        let gnd_speed = odid.loc_speed.ok_or(PacketError::MissingField("ground speed"))?;
        let vert_speed = odid
            .loc_vspeed
            .ok_or(PacketError::MissingField("vertical speed"))?;
        let lat = odid.loc_lat.ok_or(PacketError::MissingField("latitude"))?;
        let lon = odid.loc_lon.ok_or(PacketError::MissingField("longitude"))?;

        let geo_alt = odid
            .loc_geoalt
            .ok_or(PacketError::MissingField("geodetic altitude"))?;

        let geo_vert_acc = odid
            .loc_vaccuracy
            .ok_or(PacketError::MissingField("geodetic vertical accuracy"))?;
        if !(0..=15).contains(&geo_vert_acc) {
            return Err(PacketError::InvalidField {
                field: "geodetic vertical accuracy",
                reason: format!("{geo_vert_acc} out of range 0..=15"),
            });
        }

        let speed_acc = {
            let raw = odid
                .loc_speedaccuracy
                .ok_or(PacketError::MissingField("speed accuracy"))?;
            coerce_speed_accuracy(raw)
        };

        let horz_acc = {
            let raw = odid
                .loc_haccuracy
                .ok_or(PacketError::MissingField("horizontal accuracy"))?;
            coerce_bounded_accuracy(raw, "horizontal accuracy")
        };

        let baro_alt = coerce_barometric_altitude(odid.loc_pressalt);
        let baro_alt_acc = coerce_bounded_accuracy(
            odid.loc_baroaccuracy.unwrap_or(0),
            "barometric altitude accuracy",
        );
        let height = coerce_height(odid.loc_height);
        let height_type = match odid.loc_flag_heighttype {
            Some(0) | Some(1) => odid.loc_flag_heighttype.unwrap_or(0),
            _ => 0,
        };

        Ok(Record {
            src_addr,
            unique_id,
            timestamp,
            heading,
            gnd_speed,
            vert_speed,
            lat,
            lon,
            geo_alt,
            speed_acc,
            horz_acc,
            geo_vert_acc,
            baro_alt,
            baro_alt_acc,
            height,
            height_type,
        })
    }

    /// Renders the record as CSV field values in header order.
    pub fn to_csv_row(&self) -> [String; 16] {
        [
            self.src_addr.clone(),
            self.unique_id.clone(),
            self.timestamp.clone(),
            self.heading.to_string(),
            self.gnd_speed.to_string(),
            self.vert_speed.to_string(),
            self.lat.to_string(),
            self.lon.to_string(),
            self.geo_alt.to_string(),
            self.speed_acc.to_string(),
            self.horz_acc.to_string(),
            self.geo_vert_acc.to_string(),
            self.baro_alt.to_string(),
            self.baro_alt_acc.to_string(),
            self.height.to_string(),
            self.height_type.to_string(),
        ]
    }
}

fn extract_src_addr(source: &SourceFrame) -> Result<String, PacketError> {
    let src_addr = match source {
        SourceFrame::Ble { advertising_address } => format!("BDA-{advertising_address}"),
        SourceFrame::WiFi { sa_resolved } => format!("MAC-{sa_resolved}"),
    }
    .to_uppercase();

    if src_addr_pattern().is_match(&src_addr) {
        Ok(src_addr)
    } else {
        Err(PacketError::InvalidField {
            field: "source address",
            reason: src_addr,
        })
    }
}

fn extract_unique_id(odid: &OpenDroneIdFields) -> Result<String, PacketError> {
    let raw = odid
        .basicid_id_asc
        .as_ref()
        .ok_or(PacketError::MissingField("unique id"))?;
    let cleaned = unique_id_strip_pattern()
        .replace_all(raw, "")
        .trim()
        .to_string();
    // ASTM F3411-22a Basic ID numbers are max 20 characters.
    if cleaned.len() > 20 {
        return Err(PacketError::InvalidField {
            field: "unique id",
            reason: cleaned,
        });
    }
    Ok(cleaned)
}

fn extract_timestamp(
    epoch_time: f64,
    odid: &OpenDroneIdFields,
    now_epoch: f64,
) -> Result<String, PacketError> {
    let raw_loc_timestamp = odid
        .loc_timestamp
        .ok_or(PacketError::MissingField("location message timestamp"))?;

    // Value is in tenths of seconds since the top of the hour.
    let time_since_utc_hour = raw_loc_timestamp.rem_euclid(3600);
    let epoch_trunc = epoch_time - epoch_time.rem_euclid(3600.0);
    let mut remote_id_utc_timestamp = epoch_trunc + (time_since_utc_hour / 10) as f64;
    // Drone may be time-traveling to the future (usually no GPS lock yet).
    remote_id_utc_timestamp = remote_id_utc_timestamp.min(now_epoch.round());

    let secs = remote_id_utc_timestamp as i64;
    let datetime = chrono::DateTime::from_timestamp(secs, 0).ok_or(PacketError::InvalidField {
        field: "timestamp",
        reason: format!("{secs} is out of range"),
    })?;
    let formatted = datetime.format("%Y-%m-%d %H:%M:%S").to_string();
    Ok(format!("{formatted}.{}", time_since_utc_hour % 10))
}

fn coerce_speed_accuracy(raw: i64) -> i64 {
    let mut value = raw;
    if value > 15 {
        warn!(value, "invalid speed accuracy, setting to unknown");
        value = 0;
    }
    if value > 4 {
        warn!(value, "reserved speed accuracy value per ASTM F3411-22a");
    }
    if value < 0 {
        warn!(value, "negative speed accuracy, likely unsigned conversion artifact");
        value = 0;
    }
    value
}

fn coerce_bounded_accuracy(raw: i64, field: &'static str) -> i64 {
    if (0..=15).contains(&raw) {
        raw
    } else {
        warn!(value = raw, field, "accuracy out of range, setting to unknown");
        0
    }
}

/// Barometric altitude: optional in ASTM F3411-22a. A missing or invalid
/// (>int16 range) reading becomes the -1000 sentinel; otherwise the raw
/// pressure-altitude reading is rescaled by the protocol's `(v+1000)/2`
/// encoding. Whether every transmitter actually follows this encoding is
/// an open question the original implementation itself flags — this crate
/// reproduces the decode as observed rather than "fixing" it.
fn coerce_barometric_altitude(raw: Option<i64>) -> f64 {
    match raw {
        None => -1000.0,
        Some(v) if v > 31767 => {
            warn!(value = v, "invalid barometric altitude, exceeds int16 value");
            -1000.0
        }
        Some(v) => (v as f64 + 1000.0) / 2.0,
    }
}

fn coerce_height(raw: Option<i64>) -> f64 {
    match raw {
        None => -1000.0,
        Some(v) if !(-1000..=31767).contains(&v) => -1000.0,
        Some(v) => (v as f64 + 1000.0) / 2.0,
    }
}
