//! # fleetwire-server
//!
//! The relay side of the fabric.
//!
//! - [`Listener`]: axum `WebSocket` accept loop, one session per link
//! - [`LinkHub`]: attached links plus the [`SubscriptionTable`]
//! - [`BrokerRouter`]: direct, single, and broadcast forwarding between links
//! - `/health` and optional Prometheus `/metrics`

#![deny(unsafe_code)]

pub mod config;
pub mod handshake;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod router;
pub mod server;
mod session;
pub mod shutdown;
pub mod subscriptions;

pub use config::ListenerConfig;
pub use handshake::Handshake;
pub use hub::LinkHub;
pub use router::{BrokerRouter, RouteOutcome};
pub use server::{Listener, ListenerHandle};
pub use subscriptions::SubscriptionTable;
