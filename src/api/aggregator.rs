//! Cross-anchor correlation and payload assembly
//!
//! Every publish cycle starts from scratch: the devices present in all three
//! current snapshots are positioned, everything else is left out. Nothing is
//! carried from one cycle to the next.

use crate::algorithms::{GeometryError, TriangulationEngine};
use crate::api::types::{NodeDescriptor, NodeStatus, PublishPayload, TriangulatedDevice};
use crate::core::{AnchorId, DeviceReading, Snapshot, ANCHOR_COUNT, HASHED_ID_LEN};
use crate::utils::config::AnchorConfig;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// State of one anchor as read at the start of a cycle
#[derive(Debug, Clone)]
pub struct AnchorSample {
    pub config: AnchorConfig,
    pub connected: bool,
    pub first_data_received: bool,
    pub snapshot: Arc<Snapshot>,
}

impl AnchorSample {
    /// Devices this anchor contributes to the intersection
    fn visible_ids(&self) -> BTreeSet<&str> {
        if !self.connected {
            return BTreeSet::new();
        }
        self.snapshot
            .devices()
            .map(|devices| devices.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            position: self.config.position,
            status: NodeStatus::from_connected(self.connected),
            devices_detected: self.snapshot.device_count(),
            rssi_avg: self.snapshot.rssi_average(),
        }
    }
}

/// Overall progress of the system as seen by one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// At least one anchor has not delivered any data yet
    Waiting,
    /// All anchors have delivered data
    Receiving,
}

/// What happened in one publish cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub status: CycleStatus,
    pub devices_per_anchor: [(AnchorId, usize); ANCHOR_COUNT],
    pub common: usize,
    pub triangulated: usize,
    /// Common devices dropped because no position could be solved
    pub skipped: usize,
}

impl CycleSummary {
    fn log(&self) {
        let [(a, na), (b, nb), (c, nc)] = &self.devices_per_anchor;
        match self.status {
            CycleStatus::Waiting => debug!(
                %a, na, %b, nb, %c, nc,
                "Waiting for data from all anchors"
            ),
            CycleStatus::Receiving if self.common == 0 => debug!(
                %a, na, %b, nb, %c, nc,
                "No common devices yet"
            ),
            CycleStatus::Receiving => debug!(
                common = self.common,
                triangulated = self.triangulated,
                skipped = self.skipped,
                "Cycle complete"
            ),
        }
    }
}

/// Joins the three anchor snapshots into positioned devices
#[derive(Debug, Clone)]
pub struct Correlator {
    engine: TriangulationEngine,
}

impl Correlator {
    pub fn new(engine: TriangulationEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &TriangulationEngine {
        &self.engine
    }

    /// Device ids present in every sample's snapshot, in ascending order
    pub fn common_devices<'a>(&self, samples: &'a [AnchorSample; ANCHOR_COUNT]) -> Vec<&'a str> {
        let [first, second, third] = samples.each_ref().map(AnchorSample::visible_ids);
        first
            .into_iter()
            .filter(|id| second.contains(id) && third.contains(id))
            .collect()
    }

    /// Build one cycle's payload from the anchors' current state
    pub fn publish_cycle(&self, samples: &[AnchorSample; ANCHOR_COUNT]) -> (PublishPayload, CycleSummary) {
        let nodes = samples.iter().map(AnchorSample::descriptor).collect();

        let common = self.common_devices(samples);
        let mut devices = Vec::with_capacity(common.len());
        let mut skipped = 0;

        for device_id in &common {
            let Some(readings) = readings_for(samples, device_id) else {
                continue;
            };

            match self.position(device_id, readings, devices.len()) {
                Ok(device) => devices.push(device),
                Err(e) => {
                    skipped += 1;
                    warn!(device = %device_id, error = %e, "Skipping device");
                }
            }
        }

        let status = if samples.iter().all(|s| s.first_data_received) {
            CycleStatus::Receiving
        } else {
            CycleStatus::Waiting
        };

        let summary = CycleSummary {
            status,
            devices_per_anchor: samples
                .each_ref()
                .map(|s| (s.config.id.clone(), s.snapshot.device_count())),
            common: common.len(),
            triangulated: devices.len(),
            skipped,
        };
        summary.log();

        (PublishPayload { nodes, devices }, summary)
    }

    fn position(
        &self,
        device_id: &str,
        readings: [(&AnchorId, &DeviceReading); ANCHOR_COUNT],
        index: usize,
    ) -> Result<TriangulatedDevice, GeometryError> {
        let position = self.engine.solve(readings.map(|(_, r)| r.distance))?;

        let rssi: BTreeMap<AnchorId, f64> = readings
            .iter()
            .map(|(anchor, reading)| ((*anchor).clone(), reading.rssi))
            .collect();
        let rssi_avg = readings.iter().map(|(_, r)| r.rssi).sum::<f64>() / ANCHOR_COUNT as f64;

        Ok(TriangulatedDevice {
            id: format!("device-{}", index),
            device_id: device_id.to_string(),
            hashed_id: hashed_id(&readings[0].1.raw_id),
            position,
            rssi,
            rssi_avg,
            last_seen: 0,
        })
    }
}

fn readings_for<'a>(
    samples: &'a [AnchorSample; ANCHOR_COUNT],
    device_id: &str,
) -> Option<[(&'a AnchorId, &'a DeviceReading); ANCHOR_COUNT]> {
    let [a, b, c] = samples;
    Some([
        (&a.config.id, a.snapshot.get(device_id)?),
        (&b.config.id, b.snapshot.get(device_id)?),
        (&c.config.id, c.snapshot.get(device_id)?),
    ])
}

/// Leading characters of a reported id, shortened on character boundaries
pub fn hashed_id(raw_id: &str) -> String {
    raw_id.chars().take(HASHED_ID_LEN).collect()
}
