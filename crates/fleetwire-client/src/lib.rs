//! # fleetwire-client
//!
//! The rig side of the fabric.
//!
//! - [`Connector`]: one outbound link to a relay, fed into a dispatcher
//! - [`FailoverSelector`]: links to the lowest-priority relay discovery
//!   has announced, switching only on improvement
//! - [`StaticDiscovery`]: periodic announcements of configured relays

#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod discovery;
pub mod errors;
pub mod failover;
pub mod handshake;

pub use config::ConnectorConfig;
pub use connector::Connector;
pub use discovery::StaticDiscovery;
pub use errors::ConnectError;
pub use failover::{
    ConnectorOpener, FailoverDecision, FailoverSelector, FailoverState, FailoverTracker,
    RelayOpener,
};
pub use handshake::ClientHandshake;
