//! Session types: the state machine, the status other tasks can observe,
//! and the handle used to steer a session from outside its own task.
//!
//! A session's data plane (its client connection and backend link) is
//! owned by exactly one task. Everyone else, the registry, the redirect
//! handler and extensions, holds a [`SessionHandle`]: a read-only view of
//! the session's [`SessionStatus`] plus a command channel into the owning
//! task. Commands are processed one at a time, so concurrent redirects of
//! the same session are queued rather than interleaved.

use std::fmt;

use switchyard_transport::ConnectionId;
use tokio::sync::{mpsc, oneshot, watch};

use crate::SessionError;

/// How many commands may queue up for a session before
/// [`SessionHandle::request_redirect`] starts refusing new ones.
pub const COMMAND_BUFFER: usize = 16;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// A downstream game server a session can be attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Backend {
    /// Name the router and redirect events refer to it by.
    pub name: String,
    /// `host:port` to dial.
    pub addr: String,
}

impl Backend {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
///
/// ```text
/// Connecting ──▶ Authenticating ──▶ Active ◀──▶ Redirecting
///     │                │              │              │
///     └────────────────┴──────┬───────┴──────────────┘
///                             ▼
///                           Closed
/// ```
///
/// `Authenticating` is skipped when the server does not authenticate.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Accepted; no player name and no backend yet.
    Connecting,
    /// Encryption exchange and identity verification in progress.
    Authenticating,
    /// Named, registered and forwarding to a backend (if any).
    Active,
    /// Switching backends; client traffic is held until the switch ends.
    Redirecting,
    /// The client connection is gone.
    Closed,
}

impl SessionState {
    /// Returns `true` if the state machine allows moving to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Connecting, Authenticating) | (Connecting, Active) => true,
            (Authenticating, Active) => true,
            (Active, Redirecting) | (Redirecting, Active) => true,
            _ => false,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Active => "active",
            SessionState::Redirecting => "redirecting",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Snapshot of a session as seen from outside its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Name of the backend the session currently forwards to.
    pub backend: Option<String>,
}

// ---------------------------------------------------------------------------
// SessionLifecycle
// ---------------------------------------------------------------------------

/// The owning task's side of a session's status.
///
/// Every state change goes through [`transition`](Self::transition), which
/// rejects moves the state machine does not allow. Observers see changes
/// through the `watch` receivers handed out by
/// [`subscribe`](Self::subscribe).
#[derive(Debug)]
pub struct SessionLifecycle {
    tx: watch::Sender<SessionStatus>,
}

impl SessionLifecycle {
    /// Starts a lifecycle in [`SessionState::Connecting`].
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionStatus {
            state: SessionState::Connecting,
            backend: None,
        });
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.tx.borrow().state
    }

    pub fn backend(&self) -> Option<String> {
        self.tx.borrow().backend.clone()
    }

    /// Moves to `next`.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] if the move is not allowed; the
    /// state is left untouched.
    pub fn transition(&self, next: SessionState) -> Result<(), SessionError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|status| {
            if status.state == next {
                return false;
            }
            if !status.state.can_transition_to(next) {
                result = Err(SessionError::InvalidTransition {
                    from: status.state,
                    to: next,
                });
                return false;
            }
            status.state = next;
            true
        });
        result
    }

    /// Records the backend the session now forwards to.
    pub fn set_backend(&self, backend: Option<String>) {
        self.tx.send_if_modified(|status| {
            if status.state.is_closed() || status.backend == backend {
                return false;
            }
            status.backend = backend;
            true
        });
    }

    /// Moves to [`SessionState::Closed`] from wherever the session is.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        self.tx.send_if_modified(|status| {
            if status.state.is_closed() {
                return false;
            }
            status.state = SessionState::Closed;
            true
        });
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Commands and handle
// ---------------------------------------------------------------------------

/// Requests delivered to a session's owning task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Re-home the session onto `backend` without touching the client
    /// connection. `reply`, if present, receives the outcome.
    Redirect {
        backend: Backend,
        reply: Option<oneshot::Sender<Result<(), SessionError>>>,
    },
    /// Disconnect the client with `reason`.
    Kick { reason: String },
}

/// A non-owning reference to a live session.
///
/// Cheap to clone. Once the session has closed every operation on the
/// handle becomes a no-op: commands are refused and the status stays
/// [`SessionState::Closed`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: ConnectionId,
    name: String,
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Creates a handle for the session owning connection `id`, together
    /// with the receiving end of its command channel.
    pub fn new(
        id: ConnectionId,
        name: impl Into<String>,
        lifecycle: &SessionLifecycle,
    ) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = Self {
            id,
            name: name.into(),
            commands,
            status: lifecycle.subscribe(),
        };
        (handle, rx)
    }

    /// The client connection this session owns. Never changes, redirects
    /// included.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The player name, as the client sent it.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn backend(&self) -> Option<String> {
        self.status.borrow().backend.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed() || self.commands.is_closed()
    }

    /// Returns a receiver that wakes on every status change.
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Moves the session to `backend` and waits for the outcome.
    ///
    /// A failed redirect leaves the session on its previous backend; it is
    /// never a reason to drop the client.
    ///
    /// # Errors
    /// - [`SessionError::Closed`] if the session has already ended.
    /// - [`SessionError::BackendUnavailable`] if the new backend could not
    ///   be reached.
    pub async fn redirect(&self, backend: Backend) -> Result<(), SessionError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(SessionCommand::Redirect {
                backend,
                reply: Some(reply),
            })
            .await
            .map_err(|_| SessionError::Closed(self.name.clone()))?;
        outcome
            .await
            .map_err(|_| SessionError::Closed(self.name.clone()))?
    }

    /// Queues a redirect without waiting. Usable from synchronous code such
    /// as event callbacks.
    ///
    /// Returns `false` if the session is closed or its command queue is
    /// full.
    pub fn request_redirect(&self, backend: Backend) -> bool {
        self.commands
            .try_send(SessionCommand::Redirect {
                backend,
                reply: None,
            })
            .is_ok()
    }

    /// Queues a kick. Returns `false` if the session is closed or busy.
    pub fn request_kick(&self, reason: impl Into<String>) -> bool {
        self.commands
            .try_send(SessionCommand::Kick {
                reason: reason.into(),
            })
            .is_ok()
    }
}
