//! Publish payload types
//!
//! Serialized with serde into the JSON shape consumers expect:
//! `{"nodes": [...], "devices": [...]}` with camelCase keys.

use crate::core::{AnchorId, Point2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Link state of an anchor as reported to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
}

impl NodeStatus {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            NodeStatus::Online
        } else {
            NodeStatus::Offline
        }
    }
}

/// One anchor as described in a publish payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub id: AnchorId,
    pub name: String,
    pub position: Point2,
    pub status: NodeStatus,
    /// Devices in the anchor's current snapshot
    pub devices_detected: usize,
    /// Mean RSSI over the current snapshot
    pub rssi_avg: Option<f64>,
}

/// A device positioned in this cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriangulatedDevice {
    /// Per-cycle display id (`device-<n>`); carries no identity across cycles
    pub id: String,
    /// Correlation key (MAC); kept out of the payload
    #[serde(skip)]
    pub device_id: String,
    /// Leading characters of the id string reported by the first anchor
    pub hashed_id: String,
    pub position: Point2,
    pub rssi: BTreeMap<AnchorId, f64>,
    pub rssi_avg: f64,
    pub last_seen: u64,
}

/// Everything emitted to the consumer once per cycle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PublishPayload {
    pub nodes: Vec<NodeDescriptor>,
    pub devices: Vec<TriangulatedDevice>,
}

impl PublishPayload {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_wire_shape() {
        let payload = PublishPayload {
            nodes: vec![NodeDescriptor {
                id: AnchorId::new("ESP32-A"),
                name: "Node 1".to_string(),
                position: Point2::new(10.0, 10.0),
                status: NodeStatus::Online,
                devices_detected: 4,
                rssi_avg: None,
            }],
            devices: vec![TriangulatedDevice {
                id: "device-0".to_string(),
                device_id: "AA:BB:CC".to_string(),
                hashed_id: "a1b2c3d4".to_string(),
                position: Point2::new(1.5, 2.5),
                rssi: BTreeMap::from([(AnchorId::new("ESP32-A"), -60.0)]),
                rssi_avg: -60.0,
                last_seen: 0,
            }],
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "nodes": [{
                    "id": "ESP32-A",
                    "name": "Node 1",
                    "position": [10.0, 10.0],
                    "status": "online",
                    "devicesDetected": 4,
                    "rssiAvg": null
                }],
                "devices": [{
                    "id": "device-0",
                    "hashedId": "a1b2c3d4",
                    "position": [1.5, 2.5],
                    "rssi": {"ESP32-A": -60.0},
                    "rssiAvg": -60.0,
                    "lastSeen": 0
                }]
            })
        );
    }

    #[test]
    fn test_status_from_connected() {
        assert_eq!(NodeStatus::from_connected(true), NodeStatus::Online);
        assert_eq!(serde_json::to_string(&NodeStatus::Offline).unwrap(), "\"offline\"");
    }
}
