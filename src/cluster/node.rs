use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::network::Package;

/// Set while a server-role connection from this peer is bound.
pub const NODE_CONNECTED: u8 = 1;

/// Descriptor of a peer server in the cluster.
///
/// A node outlives any single connection to or from its peer. The inbound
/// server-role connection binds itself here so the rest of the process can
/// see whether the peer is reachable; the connection lifecycle is the only
/// code that updates the binding. Outbound requests to the peer register a
/// correlation here and are resolved (or cancelled) through it.
#[derive(Debug)]
pub struct ServerNode {
    pub node_id: u32,
    pub host: String,
    pub port: u16,
    flags: AtomicU8,
    connection: Mutex<Option<u64>>,
    next_correlation: AtomicU16,
    pending: DashMap<u16, oneshot::Sender<Package>>,
}

impl ServerNode {
    pub fn new(node_id: u32, host: impl Into<String>, port: u16) -> ServerNode {
        ServerNode {
            node_id,
            host: host.into(),
            port,
            flags: AtomicU8::new(0),
            connection: Mutex::new(None),
            next_correlation: AtomicU16::new(0),
            pending: DashMap::new(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn flags(&self) -> u8 {
        self.flags.load(Ordering::Acquire)
    }

    /// Points this node at its live server-role connection.
    pub fn bind_connection(&self, connection_id: u64) {
        *self.connection.lock() = Some(connection_id);
        self.flags.fetch_or(NODE_CONNECTED, Ordering::AcqRel);
        debug!("node {} bound to connection {}", self.node_id, connection_id);
    }

    /// Clears the connection back-pointer and every connection-derived flag.
    pub fn clear_connection(&self) {
        *self.connection.lock() = None;
        self.flags.store(0, Ordering::Release);
    }

    pub fn connection(&self) -> Option<u64> {
        *self.connection.lock()
    }

    /// Registers interest in the response to an outbound request and
    /// returns the correlation id to stamp on it.
    pub fn register_request(&self) -> (u16, oneshot::Receiver<Package>) {
        let correlation_id = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = oneshot::channel();
        self.pending.insert(correlation_id, response_tx);
        (correlation_id, response_rx)
    }

    /// Resolves the pending request matching the package's correlation id.
    /// Returns false when nothing was waiting for it.
    pub fn complete_request(&self, package: Package) -> bool {
        match self.pending.remove(&package.header.correlation_id) {
            Some((_, response_tx)) => response_tx.send(package).is_ok(),
            None => false,
        }
    }

    /// Drops every pending correlation; waiters observe the loss as a
    /// closed channel.
    pub fn cancel_pending(&self) {
        self.pending.clear();
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::oneshot::error::TryRecvError;

    use super::*;

    #[test]
    fn test_bind_and_clear_connection() {
        let node = ServerNode::new(1, "127.0.0.1", 9010);
        assert_eq!(node.connection(), None);
        assert_eq!(node.flags(), 0);

        node.bind_connection(77);
        assert_eq!(node.connection(), Some(77));
        assert_eq!(node.flags() & NODE_CONNECTED, NODE_CONNECTED);

        node.clear_connection();
        assert_eq!(node.connection(), None);
        assert_eq!(node.flags(), 0);
    }

    #[test]
    fn test_complete_request_resolves_by_correlation_id() {
        let node = ServerNode::new(1, "127.0.0.1", 9010);
        let (correlation_id, mut response_rx) = node.register_request();

        let response = Package::new(correlation_id, 2, Bytes::from_static(b"pong"));
        assert!(node.complete_request(response));

        let received = response_rx.try_recv().unwrap();
        assert_eq!(received.header.correlation_id, correlation_id);
        assert_eq!(received.body.as_ref(), b"pong");
        assert_eq!(node.pending_requests(), 0);
    }

    #[test]
    fn test_unknown_correlation_id_is_ignored() {
        let node = ServerNode::new(1, "127.0.0.1", 9010);
        let stray = Package::new(999, 2, Bytes::new());
        assert!(!node.complete_request(stray));
    }

    #[test]
    fn test_cancel_pending_wakes_waiters_with_loss() {
        let node = ServerNode::new(1, "127.0.0.1", 9010);
        let (_, mut response_rx) = node.register_request();
        let (_, mut other_rx) = node.register_request();
        assert_eq!(node.pending_requests(), 2);

        node.cancel_pending();
        assert_eq!(node.pending_requests(), 0);
        assert!(matches!(response_rx.try_recv(), Err(TryRecvError::Closed)));
        assert!(matches!(other_rx.try_recv(), Err(TryRecvError::Closed)));
    }
}
