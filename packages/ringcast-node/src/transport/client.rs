//! Outbound dialing with address failover.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ringcast_core::wire::{Packet, PacketBody, PacketHeader};
use ringcast_core::{Member, MemberId};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::FrameCodec;
use crate::config::{AuthenticationConfig, ConnectionConfig};
use crate::connection::{ConnectionHandle, ConnectionKind, ConnectionRegistry, OutboundMessage};
use crate::error::NodeError;
use crate::transport::handshake::build_hello;

/// Attempts every address in `member.sync_addresses`, starting from the
/// member's failover cursor, until one connects.
///
/// On success the member's cursor is left pointing at the address that
/// worked, so the next dial tries it first. Each attempt advances the
/// cursor before trying the next address: a dead address is skipped on
/// the following attempt rather than retried immediately.
pub async fn dial_with_failover(
    member: &mut Member,
    timeout: Duration,
) -> Result<TcpStream, NodeError> {
    let addr_count = member.sync_addresses.len();
    if addr_count == 0 {
        return Err(NodeError::AddressesExhausted { peer: member.id });
    }

    let start = member.current_socket_index % addr_count;
    let mut last_err: Option<std::io::Error> = None;

    for offset in 0..addr_count {
        let idx = (start + offset) % addr_count;
        let addr = &member.sync_addresses[idx];
        let target = addr.to_string();

        match tokio::time::timeout(timeout, TcpStream::connect(&target)).await {
            Ok(Ok(stream)) => {
                member.current_socket_index = idx;
                return Ok(stream);
            }
            Ok(Err(e)) => {
                warn!(peer = member.id, addr = %target, error = %e, "dial failed");
                last_err = Some(e);
            }
            Err(_) => {
                warn!(peer = member.id, addr = %target, "dial timed out");
                last_err = Some(std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timeout"));
            }
        }
        member.current_socket_index = (idx + 1) % addr_count;
    }

    match last_err {
        Some(source) => Err(NodeError::ConnectFailed {
            peer: member.id,
            addr: member.sync_addresses[start].to_string(),
            source,
        }),
        None => Err(NodeError::AddressesExhausted { peer: member.id }),
    }
}

/// A successfully dialed, authenticated outbound connection.
pub struct DialedConnection {
    pub handle: Arc<ConnectionHandle>,
    pub inbound: mpsc::Receiver<Packet>,
}

/// Dials `member`, sends the hello, and spawns the read/write loops.
///
/// Does not wait for the peer's own hello; cluster-sync or publication-sync
/// sessions built on top of this decide what to exchange next.
pub async fn connect_peer(
    self_id: MemberId,
    member: &mut Member,
    connection: &ConnectionConfig,
    auth: &AuthenticationConfig,
    registry: &ConnectionRegistry,
) -> Result<DialedConnection, NodeError> {
    let stream = dial_with_failover(member, connection.dial_timeout).await?;
    let codec = FrameCodec::new(connection.compression_threshold_bytes);
    let mut framed = Framed::new(stream, codec);

    let hello = Packet::new(
        PacketHeader::new(1, u64::from(self_id), now_ms()),
        PacketBody::Hello(build_hello(self_id, auth)),
    );
    send_packet(&mut framed, &hello).await.map_err(|source| NodeError::Io { peer: member.id, source })?;

    let (handle, mut outbound_rx) = registry.register(Some(member.id), ConnectionKind::Outbound, connection.outbound_channel_capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel(connection.outbound_channel_capacity);

    let peer_id = member.id;
    tokio::spawn(async move {
        let (mut sink, mut stream) = framed.split();
        let writer = async {
            while let Some(msg) = outbound_rx.recv().await {
                match msg {
                    OutboundMessage::Frame(bytes) => {
                        if sink.send(bytes.as_slice()).await.is_err() {
                            break;
                        }
                    }
                    OutboundMessage::Close => break,
                }
            }
        };
        let reader = async {
            while let Some(frame) = stream.next().await {
                let Ok(bytes) = frame else { break };
                let Ok(packet) = rmp_serde::from_slice::<Packet>(&bytes) else {
                    debug!(peer = peer_id, "dropping malformed frame");
                    continue;
                };
                if inbound_tx.send(packet).await.is_err() {
                    break;
                }
            }
        };
        tokio::select! {
            _ = writer => {}
            _ = reader => {}
        }
    });

    Ok(DialedConnection { handle, inbound: inbound_rx })
}

async fn send_packet(
    framed: &mut Framed<TcpStream, FrameCodec>,
    packet: &Packet,
) -> std::io::Result<()> {
    let bytes = rmp_serde::to_vec_named(packet)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    framed.send(bytes.as_slice()).await
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringcast_core::{MemberState, SyncAddress};

    fn member_with_addrs(addrs: Vec<SyncAddress>) -> Member {
        Member::new(1, MemberState::Valid, false, vec![], addrs, 0)
    }

    #[tokio::test]
    async fn dial_fails_fast_with_no_addresses() {
        let mut member = member_with_addrs(vec![]);
        let err = dial_with_failover(&mut member, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, NodeError::AddressesExhausted { peer: 1 }));
    }

    #[tokio::test]
    async fn dial_advances_cursor_past_dead_addresses() {
        let mut member = member_with_addrs(vec![
            SyncAddress::new("127.0.0.1", 1), // almost certainly closed
            SyncAddress::new("127.0.0.1", 1),
        ]);
        let result = dial_with_failover(&mut member, Duration::from_millis(50)).await;
        assert!(result.is_err());
        assert_eq!(member.current_socket_index, 0);
    }

    #[tokio::test]
    async fn dial_connects_to_live_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let mut member = member_with_addrs(vec![SyncAddress::new("127.0.0.1", port)]);
        let stream = dial_with_failover(&mut member, Duration::from_secs(2)).await;
        assert!(stream.is_ok());
        assert_eq!(member.current_socket_index, 0);
    }
}
