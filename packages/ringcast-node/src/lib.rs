//! Transport, sync engine, distribution controller, and service lifecycle
//! for a ringcast node.

pub mod codec;
pub mod config;
pub mod connection;
pub mod distribution;
pub mod error;
pub mod service;
pub mod shutdown;
pub mod sync;
pub mod transport;

pub use config::{AuthenticationConfig, ClusterConfig, ConnectionConfig, MemberIdentifier};
pub use distribution::{DistributionController, PublishResult};
pub use error::NodeError;
pub use service::{Node, PublicationHandler};
pub use shutdown::{HealthState, ShutdownController};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
