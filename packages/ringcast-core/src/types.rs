//! Core data types: members, publications, and the synchronization discipline.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Stable identifier for a member, assigned for the member's lifetime.
pub type MemberId = u16;

/// Validity state of a member.
///
/// Wire-encoded as `{0 = Valid, 1 = Down, 2 = Deleted}`; the discriminants
/// below are relied on by [`MemberState::from_wire`] and must not be
/// reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MemberState {
    Valid = 0,
    Down = 1,
    Deleted = 2,
}

impl MemberState {
    /// Decodes a wire byte into a state.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Valid),
            1 => Some(Self::Down),
            2 => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Encodes the state as its wire byte.
    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// A host/port pair a member may be reached on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncAddress {
    pub host: String,
    pub port: u16,
}

impl SyncAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl std::fmt::Display for SyncAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A cluster member: identity, validity, authentication keys, and addresses.
///
/// See the member-store merge rule for how two records of the same `id` are
/// reconciled; this type itself carries no merge logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub state: MemberState,
    pub auth_by_key: bool,
    /// Ordered key history; index 0 is the current key.
    pub key_chain: Vec<String>,
    pub sync_addresses: Vec<SyncAddress>,
    /// Monotonic logical version; only increases on accepted mutations.
    pub last_modified: u64,
    /// Member ids known to have observed this exact version of this member.
    pub aware_ids: BTreeSet<MemberId>,
    /// Failover cursor into `sync_addresses`.
    pub current_socket_index: usize,
}

impl Member {
    /// Builds a fresh member record with no observers and no rotation history.
    pub fn new(
        id: MemberId,
        state: MemberState,
        auth_by_key: bool,
        key_chain: Vec<String>,
        sync_addresses: Vec<SyncAddress>,
        last_modified: u64,
    ) -> Self {
        Self {
            id,
            state,
            auth_by_key,
            key_chain,
            sync_addresses,
            last_modified,
            aware_ids: BTreeSet::new(),
            current_socket_index: 0,
        }
    }

    /// Current authentication key, if any is configured.
    pub fn current_key(&self) -> Option<&str> {
        self.key_chain.first().map(String::as_str)
    }

    /// Whether `key` matches any entry in the key chain (current key first).
    pub fn accepts_key(&self, key: &str) -> bool {
        self.key_chain.iter().any(|k| k == key)
    }

    /// The address to try next, honoring the failover cursor.
    pub fn current_address(&self) -> Option<&SyncAddress> {
        self.sync_addresses.get(self.current_socket_index)
    }
}

/// An opaque, versioned publication addressed to a logical key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub key: String,
    pub version: u64,
    pub payload: Vec<u8>,
    /// Point-to-point target for ring packets; `None` for broadcast publications.
    pub target_node: Option<MemberId>,
    /// When true, `RING` forwarding continues past the first successful peer.
    pub ring_propagating: bool,
}

impl Publication {
    pub fn new(key: impl Into<String>, version: u64, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            version,
            payload,
            target_node: None,
            ring_propagating: false,
        }
    }
}

/// Send-side selection strategy for a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncType {
    Ring,
    UniCast,
    UniCastBalance,
    UniCastOneOf,
}
