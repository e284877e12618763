//! Player sessions for Switchyard.
//!
//! 1. **State machine**: [`SessionState`], driven by the session's owning
//!    task through [`SessionLifecycle`].
//! 2. **Handles**: [`SessionHandle`], the non-owning view other tasks use
//!    to observe a session and send it [`SessionCommand`]s (redirect, kick).
//! 3. **Registry**: [`SessionRegistry`], the concurrent name → session
//!    directory.
//! 4. **Authentication**: the [`Authenticator`] hook.
//!
//! The per-connection task that owns a session lives in the `switchyard`
//! crate; this crate only defines what it shares with everyone else.

mod auth;
mod error;
mod registry;
mod session;

pub use auth::{AllowAll, AuthRequest, Authenticator};
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{
    Backend, COMMAND_BUFFER, SessionCommand, SessionHandle, SessionLifecycle,
    SessionState, SessionStatus,
};
