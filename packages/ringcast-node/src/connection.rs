//! Tracks live TCP connections to peers, inbound and outbound.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ringcast_core::MemberId;
use tokio::sync::mpsc;

/// Opaque handle identifying one accepted or dialed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// We dialed out to this peer.
    Outbound,
    /// The peer dialed in to us.
    Inbound,
}

/// A framed payload or a close request, queued onto a connection's outbound channel.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Frame(Vec<u8>),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    Timeout,
    Disconnected,
    Full,
}

/// A live connection's outbound side plus bookkeeping metadata.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub peer_id: Option<MemberId>,
    pub kind: ConnectionKind,
    pub connected_at: Instant,
    tx: mpsc::Sender<OutboundMessage>,
}

impl ConnectionHandle {
    pub fn try_send(&self, msg: OutboundMessage) -> Result<(), SendError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Disconnected,
        })
    }

    pub async fn send_timeout(&self, msg: OutboundMessage, timeout: Duration) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Disconnected),
            Err(_) => Err(SendError::Timeout),
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Tracks every live connection, indexed by an opaque id.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new connection, returning its handle and the receiver the
    /// connection's write task should drain.
    pub fn register(
        &self,
        peer_id: Option<MemberId>,
        kind: ConnectionKind,
        capacity: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Arc::new(ConnectionHandle {
            id,
            peer_id,
            kind,
            connected_at: Instant::now(),
            tx,
        });
        self.connections.insert(id, Arc::clone(&handle));
        (handle, rx)
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(&id).map(|(_, v)| v)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|e| Arc::clone(e.value()))
    }

    pub fn get_by_peer(&self, peer_id: MemberId) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .find(|e| e.value().peer_id == Some(peer_id))
            .map(|e| Arc::clone(e.value()))
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Removes and returns every connection, for shutdown draining.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let ids: Vec<_> = self.connections.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
