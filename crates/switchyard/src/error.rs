//! Unified error type for the Switchyard proxy.

use switchyard_protocol::ProtocolError;
use switchyard_session::SessionError;
use switchyard_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// Only two kinds ever reach the caller of the public API: construction
/// failures from [`ProxyServerBuilder::build`](crate::ProxyServerBuilder::build)
/// and the non-transient accept error that ends
/// [`ProxyServer::serve`](crate::ProxyServer::serve). Everything else is
/// logged and absorbed by the session it happened in.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A packet could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (auth, name conflict, redirect).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The kick-message pattern does not compile.
    #[error("invalid kick pattern: {0}")]
    InvalidKickPattern(#[source] regex::Error),

    /// The RSA keypair could not be generated.
    #[error("key generation failed: {0}")]
    KeyGeneration(#[source] rsa::Error),

    /// The public key could not be encoded as SPKI DER.
    #[error("public key encoding failed: {0}")]
    KeyEncoding(#[source] rsa::pkcs8::spki::Error),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The client broke the login handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let proxy_err: ProxyError = err.into();
        assert!(matches!(proxy_err, ProxyError::Transport(_)));
        assert!(proxy_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let proxy_err: ProxyError = err.into();
        assert!(matches!(proxy_err, ProxyError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::NameConflict("Alice".into());
        let proxy_err: ProxyError = err.into();
        assert!(matches!(proxy_err, ProxyError::Session(_)));
        assert!(proxy_err.to_string().contains("Alice"));
    }

    #[test]
    fn test_invalid_kick_pattern_keeps_source() {
        let err = ProxyError::InvalidKickPattern(
            regex::Regex::new("(unclosed").unwrap_err(),
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_key_errors_keep_source() {
        let generation = ProxyError::KeyGeneration(rsa::Error::Decryption);
        let encoding = ProxyError::KeyEncoding(rsa::pkcs8::spki::Error::KeyMalformed);

        assert!(std::error::Error::source(&generation).is_some());
        assert!(std::error::Error::source(&encoding).is_some());
        assert!(generation.to_string().starts_with("key generation failed"));
    }
}
