//! Anchor wire format: optional `[seq/total]` fragment header and the JSON
//! device report carried in the (reassembled) body.

use crate::core::DeviceReading;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One chunk of a fragmented anchor report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// 1-based position of this chunk in its session
    pub seq: u32,
    /// Number of chunks in the session
    pub total: u32,
    pub body: Vec<u8>,
}

/// A raw payload after header inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload carried a `[seq/total]` header
    Fragment(Fragment),
    /// Payload had no header and is a complete report on its own
    Whole(Vec<u8>),
}

/// Errors raised while turning payload bytes into a device report
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid fragment header: {details}")]
    InvalidHeader { details: String },
    #[error("malformed device report: {0}")]
    MalformedReport(#[from] serde_json::Error),
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Device list decoded from a complete report body
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub devices: Vec<DeviceReading>,
}

// Every field is required and typed; one bad record fails the whole report.
#[derive(Debug, Serialize, Deserialize)]
struct WireReport {
    devices: Vec<WireDevice>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireDevice {
    mac: String,
    distance: f64,
    rssi: f64,
    id: String,
}

/// Split a raw payload into a fragment or a whole message.
///
/// The header must start at byte 0: `[`, one or more ASCII digits, `/`, one or
/// more ASCII digits, `]`. Anything else is treated as a whole message body.
pub fn parse_frame(raw: &[u8]) -> DecodeResult<Frame> {
    let Some((seq_digits, total_digits, body_start)) = split_header(raw) else {
        return Ok(Frame::Whole(raw.to_vec()));
    };

    let seq = parse_count(seq_digits, "seq")?;
    let total = parse_count(total_digits, "total")?;

    Ok(Frame::Fragment(Fragment {
        seq,
        total,
        body: raw[body_start..].to_vec(),
    }))
}

/// Locate the digit runs of a `[seq/total]` header, returning the body offset
fn split_header(raw: &[u8]) -> Option<(&[u8], &[u8], usize)> {
    if raw.first() != Some(&b'[') {
        return None;
    }

    let seq_len = raw[1..].iter().take_while(|b| b.is_ascii_digit()).count();
    let slash = 1 + seq_len;
    if seq_len == 0 || raw.get(slash) != Some(&b'/') {
        return None;
    }

    let total_len = raw[slash + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
    let close = slash + 1 + total_len;
    if total_len == 0 || raw.get(close) != Some(&b']') {
        return None;
    }

    Some((&raw[1..slash], &raw[slash + 1..close], close + 1))
}

fn parse_count(digits: &[u8], field: &str) -> DecodeResult<u32> {
    // digits are ASCII, so from_utf8 cannot fail here
    let text = std::str::from_utf8(digits).unwrap_or_default();
    let value: u32 = text.parse().map_err(|_| DecodeError::InvalidHeader {
        details: format!("{} '{}' out of range", field, text),
    })?;

    if value == 0 {
        return Err(DecodeError::InvalidHeader {
            details: format!("{} must be at least 1", field),
        });
    }

    Ok(value)
}

/// Decode a complete report body: `{"devices": [{mac, distance, rssi, id}, ...]}`
pub fn decode_report(body: &[u8]) -> DecodeResult<DeviceReport> {
    let wire: WireReport = serde_json::from_slice(body)?;

    let devices = wire
        .devices
        .into_iter()
        .map(|device| DeviceReading {
            device_id: device.mac,
            distance: device.distance,
            rssi: device.rssi,
            raw_id: device.id,
        })
        .collect();

    Ok(DeviceReport { devices })
}

/// Encode a device list the way anchors put it on the wire
pub fn encode_report(devices: &[DeviceReading]) -> Vec<u8> {
    let wire = WireReport {
        devices: devices
            .iter()
            .map(|d| WireDevice {
                mac: d.device_id.clone(),
                distance: d.distance,
                rssi: d.rssi,
                id: d.raw_id.clone(),
            })
            .collect(),
    };
    // serializing plain strings and finite-or-null floats cannot fail
    serde_json::to_vec(&wire).unwrap_or_default()
}

/// Split a report body into `[seq/total]`-prefixed chunks of at most
/// `chunk_size` body bytes. A body that fits one chunk is sent unframed.
pub fn fragment_payload(body: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    let chunk_size = chunk_size.max(1);
    if body.len() <= chunk_size {
        return vec![body.to_vec()];
    }

    let chunks: Vec<&[u8]> = body.chunks(chunk_size).collect();
    let total = chunks.len();

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let mut frame = format!("[{}/{}]", index + 1, total).into_bytes();
            frame.extend_from_slice(chunk);
            frame
        })
        .collect()
}
