//! Handshake vocabulary shared by the listener and the connector.

/// Header carrying the caller-declared connection identity.
pub const IDENTITY_HEADER: &str = "Miner-ID";

/// Header carrying the subscription manifest.
pub const SUBSCRIBE_HEADER: &str = "Subscribe";

/// Query parameter carrying the subscription manifest; takes precedence
/// over [`SUBSCRIBE_HEADER`].
pub const SUBSCRIBE_QUERY: &str = "subscribe";
