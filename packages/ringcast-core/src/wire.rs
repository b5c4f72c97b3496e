//! On-wire packet envelope and packet-specific bodies.
//!
//! Framing (the 4-byte length/flag header and the Deflate compression layer)
//! lives in the node crate's transport codec; this module only defines what
//! goes *inside* a frame once decompressed.

use serde::{Deserialize, Serialize};

use crate::types::{Member, MemberId};

/// Reserved packet ids.
///
/// The reference implementation this crate descends from assigns both
/// `PingPacket` and `PongPacket` id `3`; that collision is fixed here by
/// giving `PONG` its own id.
pub mod packet_id {
    pub const HELLO: u32 = 1;
    pub const MEMBERS_SYNC: u32 = 2;
    pub const PING: u32 = 3;
    pub const PONG: u32 = 4;
    pub const PUBLICATION: u32 = 300;
    pub const PUBLICATION_ACK: u32 = 301;
    pub const COMPLETE: u32 = 302;
}

/// Envelope fields carried by every packet, regardless of body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Unique id per emitted packet (not per logical message).
    pub packet_instance_address: u64,
    /// Sender's node-network address/id.
    pub node_write_address: u64,
    /// Wall-clock send time, milliseconds.
    pub distribution_time: u64,
    /// Destination member id, or `-1` for "any"/broadcast.
    pub target_node: i32,
}

impl PacketHeader {
    pub const ANY_TARGET: i32 = -1;

    pub fn new(packet_instance_address: u64, node_write_address: u64, distribution_time: u64) -> Self {
        Self {
            packet_instance_address,
            node_write_address,
            distribution_time,
            target_node: Self::ANY_TARGET,
        }
    }

    pub fn with_target(mut self, target: MemberId) -> Self {
        self.target_node = i32::from(target);
        self
    }
}

/// The authenticated hello sent by a client on first connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloBody {
    pub sender_id: MemberId,
    pub nonce: Vec<u8>,
    /// HMAC over `nonce` using the shared cluster key.
    pub mac: Vec<u8>,
}

/// Packet-specific body, internally tagged by packet type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketBody {
    Hello(HelloBody),
    MembersSync { members: Vec<Member> },
    Ping { sent_at_ms: u64 },
    Pong { elapsed_ms: u64 },
    Publication {
        key: String,
        version: u64,
        payload: Vec<u8>,
        target_node: Option<MemberId>,
        ring_propagating: bool,
        aware_ids: Vec<MemberId>,
    },
    PublicationAck { key: String, version: u64 },
    Complete,
}

impl PacketBody {
    /// The reserved packet id for this body's variant.
    pub fn packet_id(&self) -> u32 {
        match self {
            Self::Hello(_) => packet_id::HELLO,
            Self::MembersSync { .. } => packet_id::MEMBERS_SYNC,
            Self::Ping { .. } => packet_id::PING,
            Self::Pong { .. } => packet_id::PONG,
            Self::Publication { .. } => packet_id::PUBLICATION,
            Self::PublicationAck { .. } => packet_id::PUBLICATION_ACK,
            Self::Complete => packet_id::COMPLETE,
        }
    }
}

/// A complete wire message: envelope plus body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub header: PacketHeader,
    pub body: PacketBody,
}

impl Packet {
    pub fn new(header: PacketHeader, body: PacketBody) -> Self {
        Self { header, body }
    }

    pub fn packet_id(&self) -> u32 {
        self.body.packet_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(p: &Packet) -> Packet {
        let bytes = rmp_serde::to_vec_named(p).expect("serialize");
        rmp_serde::from_slice(&bytes).expect("deserialize")
    }

    #[test]
    fn ping_and_pong_have_distinct_ids() {
        assert_ne!(packet_id::PING, packet_id::PONG);
    }

    #[test]
    fn every_packet_id_is_unique() {
        let ids = [
            packet_id::HELLO,
            packet_id::MEMBERS_SYNC,
            packet_id::PING,
            packet_id::PONG,
            packet_id::PUBLICATION,
            packet_id::PUBLICATION_ACK,
            packet_id::COMPLETE,
        ];
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn hello_roundtrip() {
        let pkt = Packet::new(
            PacketHeader::new(1, 2, 3),
            PacketBody::Hello(HelloBody { sender_id: 7, nonce: vec![1, 2, 3], mac: vec![9, 9] }),
        );
        assert_eq!(pkt.packet_id(), packet_id::HELLO);
        assert_eq!(roundtrip(&pkt), pkt);
    }

    #[test]
    fn ping_pong_roundtrip() {
        let ping = Packet::new(PacketHeader::new(1, 2, 3), PacketBody::Ping { sent_at_ms: 1000 });
        assert_eq!(roundtrip(&ping), ping);

        let pong = Packet::new(PacketHeader::new(1, 2, 3), PacketBody::Pong { elapsed_ms: 42 });
        assert_eq!(roundtrip(&pong), pong);
    }

    #[test]
    fn publication_roundtrip_with_target() {
        let header = PacketHeader::new(5, 6, 7).with_target(3);
        assert_eq!(header.target_node, 3);
        let pkt = Packet::new(
            header,
            PacketBody::Publication {
                key: "t".into(),
                version: 7,
                payload: vec![1, 3, 3, 7],
                target_node: Some(3),
                ring_propagating: true,
                aware_ids: vec![1, 2],
            },
        );
        assert_eq!(pkt.packet_id(), packet_id::PUBLICATION);
        assert_eq!(roundtrip(&pkt), pkt);
    }

    #[test]
    fn default_target_is_any() {
        let header = PacketHeader::new(1, 1, 1);
        assert_eq!(header.target_node, PacketHeader::ANY_TARGET);
    }

    #[test]
    fn complete_marker_roundtrip() {
        let pkt = Packet::new(PacketHeader::new(1, 1, 1), PacketBody::Complete);
        assert_eq!(pkt.packet_id(), packet_id::COMPLETE);
        assert_eq!(roundtrip(&pkt), pkt);
    }
}
