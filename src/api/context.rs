//! Tracking context: the three anchors and the correlator, owned together

use crate::algorithms::TriangulationEngine;
use crate::api::aggregator::{AnchorSample, Correlator, CycleSummary};
use crate::api::anchor::AnchorHandle;
use crate::api::types::PublishPayload;
use crate::core::{AnchorId, ANCHOR_COUNT};
use crate::hardware::AnchorTransport;
use crate::processing::ReassemblyStats;
use crate::utils::config::{ConfigResult, SystemConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns every anchor of a running system.
///
/// Created once per run and passed to whatever needs it; there is no global
/// state behind it.
pub struct TrackingContext {
    anchors: [Arc<AnchorHandle>; ANCHOR_COUNT],
    correlator: Correlator,
    shutdown: CancellationToken,
}

impl TrackingContext {
    /// Spawn ingestion for each anchor. Transports are paired with the
    /// configured anchors by position. Must be called within a tokio runtime.
    pub fn start(
        config: &SystemConfig,
        transports: [Arc<dyn AnchorTransport>; ANCHOR_COUNT],
        shutdown: &CancellationToken,
    ) -> ConfigResult<Self> {
        let anchor_configs = config.anchor_array()?;
        let engine = TriangulationEngine::new(anchor_configs.each_ref().map(|a| a.position));
        if let Err(e) = engine.check_geometry() {
            warn!(error = %e, "Anchor layout is degenerate; no device will be positioned");
        }

        let token = shutdown.child_token();
        let [a, b, c] = anchor_configs;
        let [ta, tb, tc] = transports;
        let anchors = [
            Arc::new(AnchorHandle::spawn(a, ta, &token)),
            Arc::new(AnchorHandle::spawn(b, tb, &token)),
            Arc::new(AnchorHandle::spawn(c, tc, &token)),
        ];

        Ok(Self {
            anchors,
            correlator: Correlator::new(engine),
            shutdown: token,
        })
    }

    pub fn anchors(&self) -> &[Arc<AnchorHandle>; ANCHOR_COUNT] {
        &self.anchors
    }

    pub fn anchor(&self, id: &AnchorId) -> Option<&Arc<AnchorHandle>> {
        self.anchors.iter().find(|a| a.id() == id)
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Connect every anchor concurrently, returning how many succeeded.
    ///
    /// Anchors that fail stay offline; the rest keep running.
    pub async fn connect_all(&self) -> usize {
        let attempts: Vec<_> = self
            .anchors
            .iter()
            .map(|anchor| {
                let anchor = Arc::clone(anchor);
                tokio::task::spawn_blocking(move || anchor.connect())
            })
            .collect();

        let mut connected = 0;
        for attempt in attempts {
            match attempt.await {
                Ok(true) => connected += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Connect task failed"),
            }
        }

        info!("Connected {}/{} anchors", connected, ANCHOR_COUNT);
        connected
    }

    /// Read every anchor once
    pub fn samples(&self) -> [AnchorSample; ANCHOR_COUNT] {
        self.anchors.each_ref().map(|anchor| AnchorSample {
            config: anchor.config().clone(),
            connected: anchor.is_connected(),
            first_data_received: anchor.first_data_received(),
            snapshot: anchor.snapshot(),
        })
    }

    /// Run one correlation cycle over the current snapshots
    pub fn publish_cycle(&self) -> (PublishPayload, CycleSummary) {
        self.correlator.publish_cycle(&self.samples())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every anchor and disconnect its transport
    pub async fn shutdown(&self) -> Vec<(AnchorId, ReassemblyStats)> {
        self.shutdown.cancel();

        let mut stats = Vec::with_capacity(ANCHOR_COUNT);
        for anchor in &self.anchors {
            if let Some(anchor_stats) = anchor.shutdown().await {
                info!(
                    anchor = %anchor.id(),
                    reports = anchor_stats.reports_completed,
                    decode_errors = anchor_stats.decode_errors,
                    "Anchor stopped"
                );
                stats.push((anchor.id().clone(), anchor_stats));
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockTransport;

    fn transports() -> [Arc<MockTransport>; 3] {
        [
            Arc::new(MockTransport::new("ESP32_Crowd_Node_1")),
            Arc::new(MockTransport::unreachable("ESP32_Crowd_Node_2")),
            Arc::new(MockTransport::new("ESP32_Crowd_Node_3")),
        ]
    }

    fn dyn_transports(mocks: &[Arc<MockTransport>; 3]) -> [Arc<dyn AnchorTransport>; 3] {
        mocks.each_ref().map(|m| Arc::clone(m) as Arc<dyn AnchorTransport>)
    }

    #[tokio::test]
    async fn test_connect_all_tolerates_failures() {
        let mocks = transports();
        let context = TrackingContext::start(&SystemConfig::default(), dyn_transports(&mocks), &CancellationToken::new())
            .unwrap();

        assert_eq!(context.connect_all().await, 2);

        let (payload, _) = context.publish_cycle();
        let online: Vec<bool> = payload
            .nodes
            .iter()
            .map(|n| n.status == crate::api::types::NodeStatus::Online)
            .collect();
        assert_eq!(online, vec![true, false, true]);
        assert!(payload.devices.is_empty());

        context.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_each_transport_once() {
        let mocks = transports();
        let context = TrackingContext::start(&SystemConfig::default(), dyn_transports(&mocks), &CancellationToken::new())
            .unwrap();
        context.connect_all().await;

        let stats = context.shutdown().await;
        assert_eq!(stats.len(), 3);
        context.shutdown().await;

        assert!(context.is_shutting_down());
        for mock in &mocks {
            assert_eq!(mock.disconnect_calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_anchor_lookup_by_id() {
        let context = TrackingContext::start(
            &SystemConfig::default(),
            dyn_transports(&transports()),
            &CancellationToken::new(),
        )
        .unwrap();

        let anchor = context.anchor(&AnchorId::new("ESP32-B")).unwrap();
        assert_eq!(anchor.config().name, "Node 2");
        assert!(context.anchor(&AnchorId::new("ESP32-Z")).is_none());
        context.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_anchor_count_rejected() {
        let mut config = SystemConfig::default();
        config.anchors.pop();
        let result = TrackingContext::start(&config, dyn_transports(&transports()), &CancellationToken::new());
        assert!(result.is_err());
    }
}
