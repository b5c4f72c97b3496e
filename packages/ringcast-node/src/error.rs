//! Node-level error type, mirroring the five error kinds of the transport/sync layer.

use ringcast_core::MemberId;
use thiserror::Error;

/// Errors surfaced by transport, sync, and distribution operations.
///
/// Transport and protocol errors are handled locally (the offending channel
/// is closed and the peer reported failed); they still need a typed
/// representation so callers can log and branch on them.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("connect to peer {peer} at {addr} failed: {source}")]
    ConnectFailed {
        peer: MemberId,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer {peer} has no remaining addresses to try")]
    AddressesExhausted { peer: MemberId },

    #[error("read/write to peer {peer} failed: {source}")]
    Io {
        peer: MemberId,
        #[source]
        source: std::io::Error,
    },

    #[error("channel to peer {peer} closed mid-frame")]
    ChannelClosed { peer: MemberId },

    #[error("malformed frame from peer {peer}: {reason}")]
    MalformedFrame { peer: MemberId, reason: String },

    #[error("unknown packet id {id} from peer {peer}")]
    UnknownPacketId { peer: MemberId, id: u32 },

    #[error("authentication failed for peer {peer}: key not found in key chain")]
    AuthRejected { peer: MemberId },

    #[error("per-peer queue to {peer} is full")]
    QueueFull { peer: MemberId },

    #[error("publish deadline expired with {remaining} peer(s) outstanding")]
    Timeout { remaining: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("transport codec error: {0}")]
    Codec(#[from] std::io::Error),
}

impl NodeError {
    /// The peer id this error should be attributed to for publish-result
    /// aggregation, if any.
    pub fn peer(&self) -> Option<MemberId> {
        match self {
            Self::ConnectFailed { peer, .. }
            | Self::AddressesExhausted { peer }
            | Self::Io { peer, .. }
            | Self::ChannelClosed { peer }
            | Self::MalformedFrame { peer, .. }
            | Self::UnknownPacketId { peer, .. }
            | Self::AuthRejected { peer }
            | Self::QueueFull { peer } => Some(*peer),
            Self::Timeout { .. } | Self::InvalidConfig(_) | Self::Codec(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_attribution() {
        let err = NodeError::AuthRejected { peer: 3 };
        assert_eq!(err.peer(), Some(3));

        let err = NodeError::Timeout { remaining: 2 };
        assert_eq!(err.peer(), None);
    }
}
