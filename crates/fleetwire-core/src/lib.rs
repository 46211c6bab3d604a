//! # fleetwire-core
//!
//! Foundation of the fleetwire messaging fabric, shared by the relay and
//! rig roles:
//!
//! - [`envelope`]: the wire message unit and its addressing
//! - [`ids`]: branded connection and node identities
//! - [`handshake`]: header and query names used when a link is opened
//! - [`manifest`]: subscription manifests declared at handshake time
//! - [`dispatcher`]: `(topic, method)` handler registry with wildcard tiers
//! - [`link`]: the send half of one duplex connection and the shared
//!   frame-to-dispatch step used by every receive loop
//! - [`discovery`]: the service-discovery callback contract
//! - [`logging`]: subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod discovery;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod handshake;
pub mod ids;
pub mod link;
pub mod logging;
pub mod manifest;
pub mod telemetry;

pub use discovery::{DiscoveredService, DiscoveryListener, RELAY_PROTOCOL, ServiceAdvert};
pub use dispatcher::{
    DispatchReport, Dispatcher, EnvelopeHandler, FnHandler, HandlerFailure, HandlerFault,
    handler_fn,
};
pub use envelope::{
    CLOSED_METHOD, CONNECTION_TOPIC, Destination, Envelope, OPEN_METHOD, WILDCARD,
};
pub use errors::{HandlerError, LinkError, ProtocolError};
pub use ids::{ConnectionId, NodeId};
pub use link::{Delivery, Link, SenderStamp, dispatch_frame};
pub use manifest::{ManifestError, SubscriptionManifest};
