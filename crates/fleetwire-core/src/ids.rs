//! Branded ID newtypes.
//!
//! A connection is known by the identity it declared at handshake time or,
//! failing that, by an ephemeral ID the relay allocates for it. Both flow
//! through the same [`ConnectionId`] type so a caller-declared identity and
//! an allocated one are addressed identically.
//!
//! Generated IDs are UUID v7 (time-ordered) with a short type prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Allocate a fresh ID (`<prefix>_<uuid v7>`).
            #[must_use]
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Wrap an existing value, e.g. one declared by a peer.
            #[must_use]
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identity of one link as seen by the relay and by envelope addressing.
    ConnectionId, "conn"
}

branded_id! {
    /// Stable identity of this process within the fleet.
    ///
    /// A rig presents it as its connection identity; a relay advertises it
    /// in its discovery payload.
    NodeId, "node"
}

impl From<NodeId> for ConnectionId {
    fn from(id: NodeId) -> Self {
        Self(id.0)
    }
}
