//! Crowd Positioning System
//!
//! Tracks phones and other BLE devices from three fixed anchor nodes. Each
//! anchor reports the devices it sees with an estimated distance; devices
//! seen by all three anchors are positioned by 2D trilateration and the
//! result is published once per cycle as JSON.

pub mod algorithms;
pub mod api;
pub mod core;
pub mod hardware;
pub mod logging;
pub mod processing;
pub mod utils;

// Re-export commonly used types
pub use algorithms::{triangulate, GeometryError, TriangulationEngine};
pub use api::{
    run_publish_loop, AnchorHandle, AnchorState, Correlator, CycleSummary, JsonLinesSink, PayloadSink,
    PublishPayload, PublishSchedule, TrackingContext, TriangulatedDevice,
};
pub use self::core::{AnchorId, DeviceReading, Point2, Snapshot};
pub use hardware::{AnchorTransport, MockTransport, TransportError};
pub use processing::{DecodeError, FragmentReassembler, Reassembly};
pub use utils::config::{AnchorConfig, ConfigError, SystemConfig};
