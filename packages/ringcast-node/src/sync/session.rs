//! Per-outbound-session state machine: one session per targeted peer per publish.

use std::time::Duration;

use ringcast_core::wire::{Packet, PacketBody, PacketHeader};
use ringcast_core::{Member, MemberId, MemberStore, Publication};
use tracing::{debug, warn};

use crate::config::{AuthenticationConfig, ConnectionConfig};
use crate::connection::{ConnectionRegistry, OutboundMessage};
use crate::transport::client::connect_peer;

/// Where a session currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    HelloSent,
    Exchanging,
    Closing,
    Done,
    Failed,
}

/// Outcome of one session, aggregated by the distribution controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResult {
    pub peer_id: MemberId,
    pub success: bool,
    pub reason: Option<String>,
}

impl SessionResult {
    fn ok(peer_id: MemberId) -> Self {
        Self { peer_id, success: true, reason: None }
    }

    fn failed(peer_id: MemberId, reason: impl Into<String>) -> Self {
        Self { peer_id, success: false, reason: Some(reason.into()) }
    }
}

/// Drives a single outbound session through `IDLE → HELLO_SENT → EXCHANGING
/// → CLOSING → DONE`, or into `FAILED` on any transport/protocol/auth/timeout
/// error.
pub struct SyncSession {
    pub self_id: MemberId,
    pub connection: ConnectionConfig,
    pub auth: AuthenticationConfig,
}

impl SyncSession {
    pub fn new(self_id: MemberId, connection: ConnectionConfig, auth: AuthenticationConfig) -> Self {
        Self { self_id, connection, auth }
    }

    /// Sends a single application publication, with the sender's current
    /// awareness set for that publication piggybacked so the receiver can
    /// continue forwarding to peers it's missing from.
    pub async fn run_publication_sync(
        &self,
        peer: &mut Member,
        publication: &Publication,
        aware_ids: Vec<MemberId>,
        registry: &ConnectionRegistry,
    ) -> SessionResult {
        let mut state = SessionState::Idle;
        let peer_id = peer.id;
        debug!(peer = peer_id, ?state, "starting publication sync session");

        let dialed = match connect_peer(self.self_id, peer, &self.connection, &self.auth, registry).await {
            Ok(d) => d,
            Err(e) => {
                warn!(peer = peer_id, error = %e, state = ?SessionState::Failed, "dial failed, session failed before hello");
                return SessionResult::failed(peer_id, e.to_string());
            }
        };
        state = SessionState::HelloSent;
        debug!(peer = peer_id, ?state, "hello sent");

        let packet = Packet::new(
            PacketHeader::new(2, u64::from(self.self_id), now_ms()).with_target(peer_id),
            PacketBody::Publication {
                key: publication.key.clone(),
                version: publication.version,
                payload: publication.payload.clone(),
                target_node: publication.target_node,
                ring_propagating: publication.ring_propagating,
                aware_ids,
            },
        );

        if let Err(e) = send(&dialed.handle, &packet) {
            warn!(peer = peer_id, error = ?e, "failed to queue publication frame");
            return SessionResult::failed(peer_id, "queue full or disconnected");
        }
        state = SessionState::Exchanging;
        debug!(peer = peer_id, ?state, "publication frame queued, awaiting ack");

        let result = self.await_ack(&publication.key, publication.version, dialed.inbound).await;
        state = if result { SessionState::Closing } else { SessionState::Failed };

        if result {
            let close = Packet::new(PacketHeader::new(3, u64::from(self.self_id), now_ms()), PacketBody::Complete);
            let _ = send(&dialed.handle, &close);
            state = SessionState::Done;
            debug!(peer = peer_id, ?state, "publication sync session done");
            SessionResult::ok(peer_id)
        } else {
            debug!(peer = peer_id, ?state, "publication sync session failed waiting for ack");
            SessionResult::failed(peer_id, "no ack before deadline")
        }
    }

    /// Pushes the current member snapshot as synthesized member descriptors;
    /// the receiver applies the merge and, symmetrically, pushes back any
    /// versions it holds that are newer, so one round converges both ways.
    pub async fn run_cluster_sync(
        &self,
        peer: &mut Member,
        local: &MemberStore,
        registry: &ConnectionRegistry,
    ) -> SessionResult {
        let peer_id = peer.id;
        let dialed = match connect_peer(self.self_id, peer, &self.connection, &self.auth, registry).await {
            Ok(d) => d,
            Err(e) => return SessionResult::failed(peer_id, e.to_string()),
        };

        let members = local.snapshot().all.clone();
        let packet = Packet::new(
            PacketHeader::new(4, u64::from(self.self_id), now_ms()),
            PacketBody::MembersSync { members },
        );
        if let Err(e) = send(&dialed.handle, &packet) {
            return SessionResult::failed(peer_id, format!("{e:?}"));
        }

        let mut inbound = dialed.inbound;
        match tokio::time::timeout(self.connection.dial_timeout, inbound.recv()).await {
            Ok(Some(Packet { body: PacketBody::MembersSync { members }, .. })) => {
                for member in members {
                    local.put(member);
                }
                SessionResult::ok(peer_id)
            }
            Ok(Some(_)) => SessionResult::ok(peer_id),
            Ok(None) => SessionResult::failed(peer_id, "channel closed mid-frame"),
            Err(_) => SessionResult::failed(peer_id, "timeout"),
        }
    }

    async fn await_ack(
        &self,
        key: &str,
        version: u64,
        mut inbound: tokio::sync::mpsc::Receiver<Packet>,
    ) -> bool {
        let deadline = self.connection.publish_deadline;
        loop {
            match tokio::time::timeout(deadline, inbound.recv()).await {
                Ok(Some(Packet { body: PacketBody::PublicationAck { key: k, version: v }, .. })) => {
                    if k == key && v == version {
                        return true;
                    }
                }
                Ok(Some(_)) => continue,
                Ok(None) => return false,
                Err(_) => return false,
            }
        }
    }
}

fn send(handle: &crate::connection::ConnectionHandle, packet: &Packet) -> Result<(), crate::error::NodeError> {
    let bytes = rmp_serde::to_vec_named(packet).map_err(|_| crate::error::NodeError::QueueFull { peer: handle.peer_id.unwrap_or(0) })?;
    handle
        .try_send(OutboundMessage::Frame(bytes))
        .map_err(|_| crate::error::NodeError::QueueFull { peer: handle.peer_id.unwrap_or(0) })
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
