//! Runtime API for the crowd tracker
//!
//! Per-anchor ingestion, cross-anchor correlation, and the publish loop that
//! hands one payload per cycle to a consumer.

pub mod aggregator;
pub mod anchor;
pub mod context;
pub mod publisher;
pub mod types;

// Re-export commonly used API types
pub use aggregator::{hashed_id, AnchorSample, Correlator, CycleStatus, CycleSummary};
pub use anchor::{AnchorHandle, AnchorState};
pub use context::TrackingContext;
pub use publisher::{
    run_publish_loop, ChannelSink, JsonLinesSink, PayloadSink, PublishError, PublishResult, PublishSchedule,
};
pub use types::{NodeDescriptor, NodeStatus, PublishPayload, TriangulatedDevice};
