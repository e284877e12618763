//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, unknown packet, missing
    /// fields or a truncated frame.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The packet decoded fine but is not acceptable at this point of the
    /// conversation, or a link frame with an unknown tag.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
