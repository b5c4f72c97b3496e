//! ringcast core -- member model, merge rules, awareness sets, and wire messages.
//!
//! This crate provides the foundation layer shared by every node in a ringcast
//! cluster:
//!
//! - **Types** ([`types`]): `Member`, `MemberState`, `MemberId`, `Publication`, `SyncType`
//! - **Member store** ([`member_store`]): the member merge rule, snapshot caching
//! - **Publication store** ([`publication_store`]): per-`(key, version)` awareness sets
//! - **Wire** ([`wire`]): packet ids, packet envelopes, handshake payloads
//! - **Error** ([`error`]): the shared `CoreError` type

pub mod error;
pub mod member_store;
pub mod publication_store;
pub mod types;
pub mod wire;

pub use error::CoreError;
pub use member_store::{MemberSnapshot, MemberStore};
pub use publication_store::PublicationStore;
pub use types::{Member, MemberId, MemberState, Publication, SyncAddress, SyncType};
pub use wire::{packet_id, Packet, PacketHeader};
