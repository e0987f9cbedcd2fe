//! In-memory transport for tests and the simulated runtime

use crate::hardware::{AnchorTransport, PayloadHandler, TransportError, TransportResult};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// Transport whose payloads are injected by the caller
pub struct MockTransport {
    name: String,
    connected: AtomicBool,
    connect_error: Option<TransportError>,
    handler: Mutex<Option<PayloadHandler>>,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    delivered: AtomicU32,
}

impl MockTransport {
    /// Create a mock transport that accepts connections
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(false),
            connect_error: None,
            handler: Mutex::new(None),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            delivered: AtomicU32::new(0),
        }
    }

    /// Create a mock transport whose peer is never found
    pub fn unreachable(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::failing(name.clone(), TransportError::NotFound { name })
    }

    /// Create a mock transport whose every connect attempt fails with `error`
    pub fn failing(name: impl Into<String>, error: TransportError) -> Self {
        Self {
            connect_error: Some(error),
            ..Self::new(name)
        }
    }

    /// Push one raw payload through the registered handler.
    ///
    /// Returns `false` when the link is down or no handler is registered.
    pub fn deliver(&self, payload: impl Into<Vec<u8>>) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }

        let handler = match self.handler.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        match handler {
            Some(handler) => {
                handler(payload.into());
                self.delivered.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Deliver a sequence of payloads in order, returning how many went through
    pub fn deliver_all<I, P>(&self, payloads: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        payloads
            .into_iter()
            .map(|payload| self.deliver(payload))
            .filter(|delivered| *delivered)
            .count()
    }

    /// Drop the link without a disconnect call, as a peer going out of range would
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn delivered_count(&self) -> u32 {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl AnchorTransport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> TransportResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_payload_handler(&self, handler: PayloadHandler) {
        match self.handler.lock() {
            Ok(mut guard) => *guard = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn collecting_handler() -> (PayloadHandler, Arc<Mutex<Vec<Vec<u8>>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler: PayloadHandler = Arc::new(move |payload| sink.lock().unwrap().push(payload));
        (handler, received)
    }

    #[test]
    fn test_mock_transport_creation() {
        let transport = MockTransport::new("ESP32_Crowd_Node_1");
        assert_eq!(transport.name(), "ESP32_Crowd_Node_1");
        assert!(!transport.is_connected());
        assert_eq!(transport.delivered_count(), 0);
    }

    #[test]
    fn test_delivery_requires_connection_and_handler() {
        let transport = MockTransport::new("node");
        let (handler, received) = collecting_handler();

        assert!(!transport.deliver(b"early".to_vec()));

        transport.connect().unwrap();
        assert!(!transport.deliver(b"no handler".to_vec()));

        transport.set_payload_handler(handler);
        assert!(transport.deliver(b"[1/2]ab".to_vec()));
        assert_eq!(transport.deliver_all(vec![b"[2/2]cd".to_vec(), b"x".to_vec()]), 2);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 3);
        assert_eq!(received[0], b"[1/2]ab".to_vec());
        assert_eq!(received[2], b"x".to_vec());
    }

    #[test]
    fn test_unreachable_peer() {
        let transport = MockTransport::unreachable("ghost");
        assert_eq!(
            transport.connect(),
            Err(TransportError::NotFound { name: "ghost".to_string() })
        );
        assert!(!transport.is_connected());
        assert_eq!(transport.connect_calls(), 1);
    }

    #[test]
    fn test_failing_peer_reports_its_error() {
        let error = TransportError::SubscribeFailed {
            name: "node".to_string(),
            details: "notify characteristic missing".to_string(),
        };
        let transport = MockTransport::failing("node", error.clone());
        assert_eq!(transport.connect(), Err(error));
        assert!(!transport.is_connected());
        assert!(!transport.deliver(b"x".to_vec()));
    }

    #[test]
    fn test_link_loss_and_disconnect() {
        let transport = MockTransport::new("node");
        transport.connect().unwrap();

        transport.drop_link();
        assert!(!transport.is_connected());
        assert_eq!(transport.disconnect_calls(), 0);

        transport.disconnect();
        assert_eq!(transport.disconnect_calls(), 1);
    }
}
