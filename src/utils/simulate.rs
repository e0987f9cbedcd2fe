//! Simulated crowd for running without anchor hardware
//!
//! Devices wander inside the anchor area. Each anchor sees the devices within
//! its detection range and reports noisy distances and log-distance RSSI,
//! fragmented the same way real anchors fragment their reports.

use crate::api::publisher::cadence_interval;
use crate::core::{DeviceReading, Point2, ANCHOR_COUNT};
use crate::hardware::MockTransport;
use crate::processing::parser::{encode_report, fragment_payload};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// RSSI at one meter (dBm)
const RSSI_AT_ONE_METER: f64 = -59.0;
/// Path-loss exponent for free space
const PATH_LOSS_EXPONENT: f64 = 2.0;
/// Margin around the anchor bounding box devices may wander into (meters)
const AREA_MARGIN: f64 = 5.0;

/// Simulation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub device_count: usize,
    /// Uniform distance error bound (meters)
    pub range_noise_m: f64,
    /// Anchors only report devices closer than this (meters)
    pub detection_range_m: f64,
    /// Maximum step of a device per tick (meters)
    pub drift_m: f64,
    /// Report body bytes per fragment
    pub chunk_size: usize,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            device_count: 12,
            range_noise_m: 0.5,
            detection_range_m: 120.0,
            drift_m: 1.5,
            chunk_size: 180,
            seed: None,
        }
    }
}

/// One simulated phone
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedDevice {
    pub mac: String,
    pub raw_id: String,
    pub position: Point2,
}

pub struct CrowdSimulator {
    anchors: [Point2; ANCHOR_COUNT],
    config: SimulationConfig,
    min: Point2,
    max: Point2,
    devices: Vec<SimulatedDevice>,
    rng: StdRng,
}

impl CrowdSimulator {
    pub fn new(anchors: [Point2; ANCHOR_COUNT], config: SimulationConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let min = Point2::new(
            anchors.iter().map(|a| a.x).fold(f64::INFINITY, f64::min) - AREA_MARGIN,
            anchors.iter().map(|a| a.y).fold(f64::INFINITY, f64::min) - AREA_MARGIN,
        );
        let max = Point2::new(
            anchors.iter().map(|a| a.x).fold(f64::NEG_INFINITY, f64::max) + AREA_MARGIN,
            anchors.iter().map(|a| a.y).fold(f64::NEG_INFINITY, f64::max) + AREA_MARGIN,
        );

        let devices = (0..config.device_count)
            .map(|_| SimulatedDevice {
                mac: random_mac(&mut rng),
                raw_id: random_hex(&mut rng, 16),
                position: Point2::new(rng.gen_range(min.x..=max.x), rng.gen_range(min.y..=max.y)),
            })
            .collect();

        Self {
            anchors,
            config,
            min,
            max,
            devices,
            rng,
        }
    }

    pub fn devices(&self) -> &[SimulatedDevice] {
        &self.devices
    }

    /// Move every device by a bounded random step, staying inside the area
    pub fn step(&mut self) {
        let drift = self.config.drift_m;
        if drift <= 0.0 {
            return;
        }
        for device in &mut self.devices {
            let dx = self.rng.gen_range(-drift..=drift);
            let dy = self.rng.gen_range(-drift..=drift);
            device.position.x = (device.position.x + dx).clamp(self.min.x, self.max.x);
            device.position.y = (device.position.y + dy).clamp(self.min.y, self.max.y);
        }
    }

    /// What anchor `index` currently reports
    pub fn readings_for(&mut self, index: usize) -> Vec<DeviceReading> {
        let Some(anchor) = self.anchors.get(index).copied() else {
            return Vec::new();
        };
        let noise = self.config.range_noise_m;
        let range = self.config.detection_range_m;

        let mut readings = Vec::new();
        for device in &self.devices {
            let true_distance = device.position.distance_to(&anchor);
            if true_distance > range {
                continue;
            }
            let error = if noise > 0.0 { self.rng.gen_range(-noise..=noise) } else { 0.0 };
            readings.push(DeviceReading {
                device_id: device.mac.clone(),
                distance: (true_distance + error).max(0.0),
                rssi: rssi_at(true_distance).round(),
                raw_id: device.raw_id.clone(),
            });
        }
        readings
    }

    /// Wire frames for anchor `index`, fragmented when the report is large
    pub fn frames_for(&mut self, index: usize) -> Vec<Vec<u8>> {
        let body = encode_report(&self.readings_for(index));
        fragment_payload(&body, self.config.chunk_size)
    }
}

/// Log-distance path-loss model
pub fn rssi_at(distance: f64) -> f64 {
    RSSI_AT_ONE_METER - 10.0 * PATH_LOSS_EXPONENT * distance.max(0.1).log10()
}

fn random_mac(rng: &mut StdRng) -> String {
    (0..6)
        .map(|_| format!("{:02X}", rng.gen::<u8>()))
        .collect::<Vec<_>>()
        .join(":")
}

fn random_hex(rng: &mut StdRng, len: usize) -> String {
    (0..len).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
}

/// Push one round of reports into each transport per tick until cancelled
pub async fn run_feeder(
    mut simulator: CrowdSimulator,
    transports: [Arc<MockTransport>; ANCHOR_COUNT],
    period: Duration,
    shutdown: CancellationToken,
) {
    info!(
        devices = simulator.devices().len(),
        period_ms = period.as_millis() as u64,
        "Simulated anchors starting"
    );

    let mut interval = cadence_interval(period, "simulator");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Simulated anchors shutting down");
                break;
            }

            _ = interval.tick() => {
                simulator.step();
                for (index, transport) in transports.iter().enumerate() {
                    let frames = simulator.frames_for(index);
                    let sent = frames.len();
                    let delivered = transport.deliver_all(frames);
                    debug!(index, sent, delivered, "Simulated report pushed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AnchorId;
    use crate::hardware::{AnchorTransport, PayloadHandler};
    use crate::processing::{FragmentReassembler, Reassembly};

    fn anchors() -> [Point2; 3] {
        [Point2::new(10.0, 10.0), Point2::new(90.0, 10.0), Point2::new(50.0, 80.0)]
    }

    fn seeded(config: SimulationConfig) -> CrowdSimulator {
        CrowdSimulator::new(anchors(), SimulationConfig { seed: Some(7), ..config })
    }

    #[test]
    fn test_devices_start_inside_area() {
        let sim = seeded(SimulationConfig::default());
        assert_eq!(sim.devices().len(), 12);
        for device in sim.devices() {
            assert!((5.0..=95.0).contains(&device.position.x));
            assert!((5.0..=85.0).contains(&device.position.y));
            assert_eq!(device.mac.len(), 17);
            assert_eq!(device.raw_id.len(), 16);
        }
    }

    #[test]
    fn test_same_seed_same_crowd() {
        let a = seeded(SimulationConfig::default());
        let b = seeded(SimulationConfig::default());
        assert_eq!(a.devices(), b.devices());
    }

    #[test]
    fn test_noise_free_readings_are_exact() {
        let mut sim = seeded(SimulationConfig {
            range_noise_m: 0.0,
            ..SimulationConfig::default()
        });
        let readings = sim.readings_for(0);
        assert_eq!(readings.len(), 12);

        let first = &sim.devices()[0];
        let reading = readings.iter().find(|r| r.device_id == first.mac).unwrap();
        assert!((reading.distance - first.position.distance_to(&anchors()[0])).abs() < 1e-12);
    }

    #[test]
    fn test_detection_range_limits_readings() {
        let mut sim = seeded(SimulationConfig {
            detection_range_m: 0.0,
            ..SimulationConfig::default()
        });
        assert!(sim.readings_for(1).is_empty());
        assert!(sim.readings_for(7).is_empty());
    }

    #[test]
    fn test_step_keeps_devices_in_area() {
        let mut sim = seeded(SimulationConfig {
            drift_m: 50.0,
            ..SimulationConfig::default()
        });
        for _ in 0..20 {
            sim.step();
        }
        for device in sim.devices() {
            assert!((5.0..=95.0).contains(&device.position.x));
            assert!((5.0..=85.0).contains(&device.position.y));
        }
    }

    #[test]
    fn test_frames_reassemble_into_report() {
        let mut sim = seeded(SimulationConfig {
            chunk_size: 40,
            ..SimulationConfig::default()
        });
        let frames = sim.frames_for(2);
        assert!(frames.len() > 1);
        assert!(frames[0].starts_with(b"[1/"));

        let mut reassembler = FragmentReassembler::new(AnchorId::new("ESP32-C"));
        let mut last = Reassembly::Pending;
        for frame in &frames {
            last = reassembler.feed(frame).unwrap();
        }
        match last {
            Reassembly::Complete(report) => assert_eq!(report.devices.len(), 12),
            Reassembly::Pending => panic!("report did not complete"),
        }
    }

    #[test]
    fn test_rssi_falls_with_distance() {
        assert_eq!(rssi_at(1.0), -59.0);
        assert!((rssi_at(10.0) - -79.0).abs() < 1e-9);
        assert!(rssi_at(50.0) < rssi_at(5.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feeder_survives_zero_period() {
        let transports = [
            Arc::new(MockTransport::new("n1")),
            Arc::new(MockTransport::new("n2")),
            Arc::new(MockTransport::new("n3")),
        ];
        for transport in &transports {
            let ignore: PayloadHandler = Arc::new(|_| {});
            transport.set_payload_handler(ignore);
            transport.connect().unwrap();
        }

        let shutdown = CancellationToken::new();
        let feeder = tokio::spawn(run_feeder(
            seeded(SimulationConfig::default()),
            transports.clone(),
            Duration::ZERO,
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(5)).await;
        shutdown.cancel();
        assert!(feeder.await.is_ok());

        for transport in &transports {
            assert!(transport.delivered_count() >= 1);
        }
    }
}
