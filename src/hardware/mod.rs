//! Transport abstraction for anchor nodes
//!
//! Discovery and link management live outside this crate; the core only
//! needs a way to connect, receive raw notification payloads, and disconnect.

pub mod transport;
pub mod mock;
pub mod error;

pub use transport::{AnchorTransport, PayloadHandler};
pub use mock::MockTransport;
pub use error::{TransportError, TransportResult};
