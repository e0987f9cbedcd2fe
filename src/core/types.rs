//! Core data types for the positioning system

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 2D position in the local map frame (meters)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Point2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

// Positions travel as `[x, y]` on the wire.
impl Serialize for Point2 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.x, self.y].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Point2 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [x, y] = <[f64; 2]>::deserialize(deserializer)?;
        Ok(Point2 { x, y })
    }
}

/// Identifier of a fixed anchor node (e.g. `ESP32-A`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(pub String);

impl AnchorId {
    pub fn new(id: impl Into<String>) -> Self {
        AnchorId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnchorId {
    fn from(id: &str) -> Self {
        AnchorId(id.to_string())
    }
}

/// One device as reported by one anchor
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    /// Device identity used for cross-anchor correlation (the reported MAC)
    pub device_id: String,
    /// Estimated distance from the anchor (meters)
    pub distance: f64,
    pub rssi: f64,
    /// Opaque id string reported alongside the MAC
    pub raw_id: String,
}

/// Device readings of one completed report, keyed by device id
pub type DeviceMap = HashMap<String, DeviceReading>;

/// Latest completed device list of an anchor.
///
/// Replaced as a whole on every successful reassembly, never merged.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Snapshot {
    /// No report has been reassembled yet
    #[default]
    NotStarted,
    /// Most recent completed report (possibly empty)
    Ready(DeviceMap),
}

impl Snapshot {
    /// Build a ready snapshot from a decoded device list.
    ///
    /// A later entry for the same device id replaces an earlier one.
    pub fn from_readings(readings: Vec<DeviceReading>) -> Self {
        let devices = readings
            .into_iter()
            .map(|reading| (reading.device_id.clone(), reading))
            .collect();
        Snapshot::Ready(devices)
    }

    pub fn devices(&self) -> Option<&DeviceMap> {
        match self {
            Snapshot::NotStarted => None,
            Snapshot::Ready(devices) => Some(devices),
        }
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceReading> {
        self.devices().and_then(|devices| devices.get(device_id))
    }

    pub fn device_count(&self) -> usize {
        self.devices().map_or(0, |devices| devices.len())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Snapshot::Ready(_))
    }

    /// Mean RSSI over the snapshot, `None` when it holds no devices
    pub fn rssi_average(&self) -> Option<f64> {
        let devices = self.devices()?;
        if devices.is_empty() {
            return None;
        }
        Some(devices.values().map(|d| d.rssi).sum::<f64>() / devices.len() as f64)
    }
}
