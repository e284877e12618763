//! Identity verification hook.
//!
//! Switchyard does not talk to any identity service itself. When the
//! server's authenticate flag is set, the handshake ends with a call to the
//! [`Authenticator`] you supplied; how it decides is up to you.

use std::future::Future;

use crate::SessionError;

/// What the handshake knows about a player when it asks for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// The name the client asked to play as.
    pub name: String,
    /// Hex digest binding this connection's shared secret to the proxy's
    /// public key. An identity service that saw the client announce the same
    /// hash knows the client holds the secret.
    pub server_hash: String,
}

/// Verifies that a client really is the player it claims to be.
///
/// `Send + Sync + 'static` because one authenticator is shared by every
/// session task for as long as the server runs.
///
/// # Example
///
/// ```rust
/// use switchyard_session::{AuthRequest, Authenticator, SessionError};
///
/// /// Only lets a fixed set of names in.
/// struct Allowlist(Vec<String>);
///
/// impl Authenticator for Allowlist {
///     async fn authenticate(&self, request: &AuthRequest) -> Result<(), SessionError> {
///         if self.0.iter().any(|n| n.eq_ignore_ascii_case(&request.name)) {
///             Ok(())
///         } else {
///             Err(SessionError::AuthFailed(format!("{} is not allowed", request.name)))
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Returns `Ok(())` if the player may log in.
    ///
    /// # Errors
    /// [`SessionError::AuthFailed`] if the player could not be verified.
    fn authenticate(
        &self,
        request: &AuthRequest,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Accepts every player that completed the encryption exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    async fn authenticate(&self, _request: &AuthRequest) -> Result<(), SessionError> {
        Ok(())
    }
}
