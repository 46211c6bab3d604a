//! Error types shared by every fleetwire role.

use thiserror::Error;

/// An inbound frame could not be turned into an [`Envelope`](crate::Envelope).
///
/// Protocol faults never close the link: the frame is logged and dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    NotJson(#[source] serde_json::Error),
    /// The frame is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// A required string field is absent or not a string.
    #[error("frame is missing string field `{0}`")]
    MissingField(&'static str),
    /// A field is present but has the wrong shape.
    #[error("frame is malformed: {0}")]
    Malformed(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Short machine-readable label, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotJson(_) => "not_json",
            Self::NotAnObject => "not_object",
            Self::MissingField(_) => "missing_field",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Sending over a link failed.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No link is currently established.
    #[error("no link is established")]
    NotConnected,
    /// The link's writer has gone away.
    #[error("link is closed")]
    Closed,
    /// The link's bounded send queue is full.
    #[error("link send queue is full")]
    Full,
    /// The envelope could not be serialized.
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A handler failed while processing an envelope.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("{0}")]
    Failed(String),
    /// A send performed by the handler failed.
    #[error(transparent)]
    Link(#[from] LinkError),
    /// The handler could not decode or encode a payload.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl HandlerError {
    /// Build a [`HandlerError::Failed`] from any displayable message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_kinds() {
        assert_eq!(ProtocolError::NotAnObject.kind(), "not_object");
        assert_eq!(ProtocolError::MissingField("event").kind(), "missing_field");
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(ProtocolError::NotJson(json_err).kind(), "not_json");
    }

    #[test]
    fn missing_field_names_the_field() {
        let err = ProtocolError::MissingField("method");
        assert_eq!(err.to_string(), "frame is missing string field `method`");
    }

    #[test]
    fn link_error_converts_into_handler_error() {
        let err: HandlerError = LinkError::NotConnected.into();
        assert!(matches!(err, HandlerError::Link(LinkError::NotConnected)));
        assert_eq!(err.to_string(), "no link is established");
    }

    #[test]
    fn failed_helper() {
        let err = HandlerError::failed("boom");
        assert_eq!(err.to_string(), "boom");
    }
}
