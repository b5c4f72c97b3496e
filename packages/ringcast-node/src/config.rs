//! Plain configuration consumed by the core; no fluent builder lives here.

use std::time::Duration;

use ringcast_core::{MemberId, SyncAddress, SyncType};

/// A bootstrap peer: its id and the addresses it may be reached on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberIdentifier {
    pub id: MemberId,
    pub addresses: Vec<SyncAddress>,
}

/// Pre-shared-key authentication settings for the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationConfig {
    pub use_verification: bool,
    pub key: String,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self { use_verification: false, key: String::new() }
    }
}

/// Tunables for the transport and distribution layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Capacity of each per-peer outbound channel; beyond this, sends fail
    /// with `WORK_FAILED` rather than blocking other peers.
    pub outbound_channel_capacity: usize,
    pub dial_timeout: Duration,
    /// Implicit deadline on a single `publish` call.
    pub publish_deadline: Duration,
    /// Bound on concurrently active sync sessions per publish.
    pub max_parallel_sessions: usize,
    /// Payloads at or above this size are Deflate-compressed.
    pub compression_threshold_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            dial_timeout: Duration::from_secs(5),
            publish_deadline: Duration::from_secs(10),
            max_parallel_sessions: 8,
            compression_threshold_bytes: 256,
        }
    }
}

/// The full set of options the core consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub self_id: MemberId,
    pub self_addresses: Vec<SyncAddress>,
    pub members: Vec<MemberIdentifier>,
    /// Tiebreak order for `UNI_CAST_ONE_OF` / ring ordering.
    pub priorities: Vec<MemberId>,
    pub sync_type: SyncType,
    pub authentication: AuthenticationConfig,
    pub channels: Vec<String>,
    pub connection: ConnectionConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            self_id: 0,
            self_addresses: Vec::new(),
            members: Vec::new(),
            priorities: Vec::new(),
            sync_type: SyncType::UniCast,
            authentication: AuthenticationConfig::default(),
            channels: Vec::new(),
            connection: ConnectionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative_and_finite() {
        let cfg = ClusterConfig::default();
        assert_eq!(cfg.sync_type, SyncType::UniCast);
        assert!(!cfg.authentication.use_verification);
        assert_eq!(cfg.connection.outbound_channel_capacity, 256);
        assert_eq!(cfg.connection.compression_threshold_bytes, 256);
        assert!(cfg.connection.publish_deadline > Duration::ZERO);
    }
}
