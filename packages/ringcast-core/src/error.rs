//! Shared error type for member/publication store operations.
//!
//! Internal merges never raise -- a stale or malformed-but-reachable update is
//! silently dropped and logged. `CoreError` exists for the handful of calls
//! that are genuine programming errors rather than racy network input (see
//! the "State" error kind).

use thiserror::Error;

use crate::types::MemberState;

/// Errors surfaced by the member/publication stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Attempted to rotate the key of a member that is not `VALID`.
    #[error("cannot rotate key for member {id} in state {state:?}: member is not VALID")]
    KeyRotationOnInvalidMember { id: u16, state: MemberState },

    /// A publication key must be non-empty.
    #[error("publication key must not be empty")]
    EmptyPublicationKey,
}
