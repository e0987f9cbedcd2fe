//! Anchor transport trait

use crate::hardware::TransportResult;
use std::sync::Arc;

/// Callback receiving each raw notification payload, in delivery order
pub type PayloadHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Link to one anchor node.
///
/// Implementations wrap the wireless stack (scan, connect, subscribe).
/// Methods take `&self` so a transport can be shared between the ingestion
/// task and the aggregator's status queries.
pub trait AnchorTransport: Send + Sync {
    /// Name the transport uses to find its peer (e.g. advertised device name)
    fn name(&self) -> &str;

    /// Establish the link and start notifications. May block.
    fn connect(&self) -> TransportResult<()>;

    /// Register the payload callback. Replaces any previous handler.
    fn set_payload_handler(&self, handler: PayloadHandler);

    /// Stop notifications and release the link
    fn disconnect(&self);

    /// Whether the link is currently up
    fn is_connected(&self) -> bool;
}
