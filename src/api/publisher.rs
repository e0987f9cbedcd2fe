//! Payload consumers and the fixed-cadence publish loop

use crate::api::context::TrackingContext;
use crate::api::types::PublishPayload;
use std::io::Write;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors raised by a payload consumer
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write payload: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload receiver dropped")]
    Closed,
}

pub type PublishResult<T> = Result<T, PublishError>;

/// Consumer of one payload per publish cycle
pub trait PayloadSink: Send {
    fn publish(&mut self, payload: &PublishPayload) -> PublishResult<()>;
}

/// Writes each payload as one line of JSON.
///
/// Writes are synchronous and run on the publish loop's task. That suits
/// stdout or a file at the configured cadence; a consumer that may stall
/// belongs behind a [`ChannelSink`] instead.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> PayloadSink for JsonLinesSink<W> {
    fn publish(&mut self, payload: &PublishPayload) -> PublishResult<()> {
        serde_json::to_writer(&mut self.writer, payload)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Forwards payloads to an in-process receiver
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<PublishPayload>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PublishPayload>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl PayloadSink for ChannelSink {
    fn publish(&mut self, payload: &PublishPayload) -> PublishResult<()> {
        self.sender.send(payload.clone()).map_err(|_| PublishError::Closed)
    }
}

/// Shortest timer period the loops accept
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Fixed-cadence timer; a zero period is raised to [`MIN_TICK_PERIOD`]
pub fn cadence_interval(period: Duration, timer: &str) -> Interval {
    let period = if period < MIN_TICK_PERIOD {
        warn!(timer, requested_ms = period.as_millis() as u64, "Timer period too short, using 1 ms");
        MIN_TICK_PERIOD
    } else {
        period
    };

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Timing of the publish loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishSchedule {
    pub interval: Duration,
    /// Wait before the first cycle so anchors can deliver their first reports
    pub startup_delay: Duration,
    /// Stop after this many cycles; runs until cancelled when `None`
    pub max_cycles: Option<u64>,
}

/// Run publish cycles at a fixed cadence until cancelled.
///
/// A failing sink is logged and the loop carries on with the next cycle.
/// Returns the number of cycles run.
pub async fn run_publish_loop<S: PayloadSink>(
    context: &TrackingContext,
    sink: &mut S,
    schedule: PublishSchedule,
    shutdown: CancellationToken,
) -> u64 {
    info!(
        interval_ms = schedule.interval.as_millis() as u64,
        startup_delay_ms = schedule.startup_delay.as_millis() as u64,
        "Publish loop starting"
    );

    if !schedule.startup_delay.is_zero() {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Publish loop cancelled during startup delay");
                return 0;
            }

            _ = tokio::time::sleep(schedule.startup_delay) => {}
        }
    }

    let mut interval = cadence_interval(schedule.interval, "publish");
    let mut cycles = 0u64;

    loop {
        if schedule.max_cycles.is_some_and(|max| cycles >= max) {
            debug!(cycles, "Cycle limit reached");
            break;
        }

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                break;
            }

            _ = interval.tick() => {
                let (payload, _) = context.publish_cycle();
                if let Err(e) = sink.publish(&payload) {
                    warn!(error = %e, "Failed to publish payload");
                }
                cycles += 1;
            }
        }
    }

    info!(cycles, "Publish loop stopped");
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{NodeDescriptor, NodeStatus};
    use crate::core::{AnchorId, Point2};

    fn payload() -> PublishPayload {
        PublishPayload {
            nodes: vec![NodeDescriptor {
                id: AnchorId::new("ESP32-A"),
                name: "Node 1".to_string(),
                position: Point2::new(10.0, 10.0),
                status: NodeStatus::Offline,
                devices_detected: 0,
                rssi_avg: None,
            }],
            devices: Vec::new(),
        }
    }

    #[test]
    fn test_json_lines_sink_writes_one_line_per_payload() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish(&payload()).unwrap();
        sink.publish(&payload()).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let decoded: PublishPayload = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(decoded, payload());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_raised_to_minimum() {
        let mut interval = cadence_interval(Duration::ZERO, "test");
        assert_eq!(interval.period(), MIN_TICK_PERIOD);

        let start = tokio::time::Instant::now();
        interval.tick().await;
        interval.tick().await;
        assert_eq!(start.elapsed(), MIN_TICK_PERIOD);
    }

    #[test]
    fn test_channel_sink_reports_closed_receiver() {
        let (mut sink, mut receiver) = ChannelSink::new();
        sink.publish(&payload()).unwrap();
        assert_eq!(receiver.try_recv().unwrap(), payload());

        drop(receiver);
        assert!(matches!(sink.publish(&payload()), Err(PublishError::Closed)));
    }
}
