//! Connection establishment: inbound listener, outbound dialer, handshake.

pub mod client;
pub mod handshake;
pub mod server;

pub use client::{connect_peer, dial_with_failover, DialedConnection};
pub use server::{serve, AcceptedConnection};
