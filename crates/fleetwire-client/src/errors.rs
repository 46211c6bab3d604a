//! Connector errors.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Establishing an outbound link failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// A handshake header name or value is not valid HTTP.
    #[error("invalid handshake header `{0}`")]
    InvalidHeader(String),
    /// The `WebSocket` handshake or transport failed.
    #[error("websocket error: {0}")]
    Transport(#[source] Box<tungstenite::Error>),
    /// The relay did not complete the handshake in time.
    #[error("timed out connecting after {0:?}")]
    Timeout(Duration),
}

impl From<tungstenite::Error> for ConnectError {
    fn from(error: tungstenite::Error) -> Self {
        Self::Transport(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            ConnectError::InvalidHeader("Miner-ID".into()).to_string(),
            "invalid handshake header `Miner-ID`"
        );
        assert_eq!(
            ConnectError::Timeout(Duration::from_secs(3)).to_string(),
            "timed out connecting after 3s"
        );
    }

    #[test]
    fn transport_errors_convert() {
        let err: ConnectError = tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, ConnectError::Transport(_)));
    }
}
