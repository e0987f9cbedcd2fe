//! Per-anchor state and ingestion task
//!
//! Each anchor runs its own task that exclusively owns the
//! [`FragmentReassembler`]. The transport callback only forwards raw payloads
//! into an unbounded channel, so delivery order is preserved and the callback
//! never blocks. Completed reports are published through a `watch` channel as
//! a whole `Arc<Snapshot>`, which readers see swapped atomically.

use crate::core::{AnchorId, Snapshot};
use crate::hardware::{AnchorTransport, PayloadHandler};
use crate::processing::{DecodeResult, FragmentReassembler, Reassembly, ReassemblyStats};
use crate::utils::config::AnchorConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ingestion-side state of one anchor
pub struct AnchorState {
    id: AnchorId,
    reassembler: FragmentReassembler,
    first_data: Arc<AtomicBool>,
    snapshot: watch::Sender<Arc<Snapshot>>,
}

impl AnchorState {
    /// Create the state and the receiver readers use to observe its snapshot
    pub fn new(id: AnchorId) -> (Self, watch::Receiver<Arc<Snapshot>>) {
        let (snapshot, receiver) = watch::channel(Arc::new(Snapshot::NotStarted));
        let state = Self {
            reassembler: FragmentReassembler::new(id.clone()),
            id,
            first_data: Arc::new(AtomicBool::new(false)),
            snapshot,
        };
        (state, receiver)
    }

    pub fn id(&self) -> &AnchorId {
        &self.id
    }

    /// Handle one raw payload.
    ///
    /// On a completed report the snapshot is replaced as a whole; on a decode
    /// failure the previous snapshot stays in place.
    pub fn on_raw_payload(&mut self, raw: &[u8]) -> DecodeResult<Reassembly> {
        if raw.is_empty() {
            return Ok(Reassembly::Pending);
        }

        if !self.first_data.swap(true, Ordering::SeqCst) {
            info!(anchor = %self.id, "First data received");
        }

        let outcome = self.reassembler.feed(raw)?;
        if let Reassembly::Complete(report) = &outcome {
            let snapshot = Snapshot::from_readings(report.devices.clone());
            debug!(anchor = %self.id, devices = snapshot.device_count(), "Snapshot replaced");
            self.snapshot.send_replace(Arc::new(snapshot));
        }
        Ok(outcome)
    }

    pub fn first_data_received(&self) -> bool {
        self.first_data.load(Ordering::SeqCst)
    }

    /// Flag shared with readers of this anchor
    pub fn first_data_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.first_data)
    }

    pub fn reassembly_stats(&self) -> ReassemblyStats {
        self.reassembler.stats()
    }
}

/// Drain payloads until shutdown or until the transport side is gone
async fn run_ingestion(
    mut state: AnchorState,
    mut payloads: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: CancellationToken,
) -> ReassemblyStats {
    debug!(anchor = %state.id(), "Ingestion task starting");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!(anchor = %state.id(), "Ingestion task shutting down");
                break;
            }

            payload = payloads.recv() => {
                let Some(payload) = payload else {
                    debug!(anchor = %state.id(), "Payload channel closed");
                    break;
                };
                // Errors are logged by the reassembler and stay local to this anchor
                let _ = state.on_raw_payload(&payload);
            }
        }
    }

    state.reassembly_stats()
}

/// Read-side view of a running anchor, shared with the aggregator
pub struct AnchorHandle {
    config: AnchorConfig,
    transport: Arc<dyn AnchorTransport>,
    snapshot: watch::Receiver<Arc<Snapshot>>,
    first_data: Arc<AtomicBool>,
    shutdown: CancellationToken,
    released: AtomicBool,
    task: Mutex<Option<JoinHandle<ReassemblyStats>>>,
}

impl AnchorHandle {
    /// Register the payload callback on `transport` and start the ingestion task.
    ///
    /// Must be called from within a tokio runtime. `shutdown` is the parent
    /// token; the anchor stops when it or its own child token is cancelled.
    pub fn spawn(config: AnchorConfig, transport: Arc<dyn AnchorTransport>, shutdown: &CancellationToken) -> Self {
        let (state, snapshot) = AnchorState::new(config.id.clone());
        let first_data = state.first_data_flag();
        let (sender, receiver) = mpsc::unbounded_channel();

        let anchor = config.id.clone();
        let handler: PayloadHandler = Arc::new(move |payload: Vec<u8>| {
            if sender.send(payload).is_err() {
                debug!(anchor = %anchor, "Payload arrived after ingestion stopped");
            }
        });
        transport.set_payload_handler(handler);

        let token = shutdown.child_token();
        let task = tokio::spawn(run_ingestion(state, receiver, token.clone()));

        Self {
            config,
            transport,
            snapshot,
            first_data,
            shutdown: token,
            released: AtomicBool::new(false),
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> &AnchorId {
        &self.config.id
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    /// Connect the underlying transport. Blocks for as long as the transport does.
    pub fn connect(&self) -> bool {
        if self.released.load(Ordering::SeqCst) {
            warn!(anchor = %self.config.id, "Connect requested after shutdown");
            return false;
        }

        match self.transport.connect() {
            Ok(()) => {
                info!(anchor = %self.config.id, transport = self.transport.name(), "Connected");
                true
            }
            Err(e) => {
                warn!(anchor = %self.config.id, error = %e, "Connection failed");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.released.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    pub fn first_data_received(&self) -> bool {
        self.first_data.load(Ordering::SeqCst)
    }

    /// Current snapshot; never observes a partially replaced one
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    /// A receiver that is notified whenever the snapshot is replaced
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.clone()
    }

    /// Stop ingestion and release the transport.
    ///
    /// The transport is disconnected exactly once however often this is
    /// called. Returns the reassembly counters on the first call.
    pub async fn shutdown(&self) -> Option<ReassemblyStats> {
        self.shutdown.cancel();

        if !self.released.swap(true, Ordering::SeqCst) {
            self.transport.disconnect();
            info!(anchor = %self.config.id, "Disconnected");
        }

        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }?;

        match task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(anchor = %self.config.id, error = %e, "Ingestion task ended abnormally");
                None
            }
        }
    }
}
