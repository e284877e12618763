//! The server's state as seen by extensions.
//!
//! [`ProxyContext`] is the same object the server consults internally, so
//! an extension reading it sees exactly what the accept loop and the
//! session tasks see.

use std::sync::Arc;

use switchyard_session::{SessionHandle, SessionRegistry, SessionState};
use switchyard_transport::ConnectionId;
use tokio::sync::broadcast;

use crate::config::ProxyConfig;
use crate::connect::Connectivity;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const EVENT_BUFFER: usize = 256;

/// Things that happen to sessions, published to [`ProxyContext::subscribe`]
/// receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    /// A connection was accepted and its session task started.
    SessionOpened { conn_id: ConnectionId },
    /// A player finished logging in and is attached to `backend`.
    PlayerJoined { player: String, backend: String },
    /// A registered player's session ended.
    PlayerLeft { player: String },
    /// A player moved between backends.
    Redirected {
        player: String,
        from: String,
        to: String,
    },
    /// A redirect was attempted and the player stayed where they were.
    RedirectFailed {
        player: String,
        backend: String,
        reason: String,
    },
}

/// Shared, cloneable handle on the running proxy.
#[derive(Clone)]
pub struct ProxyContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    config: Arc<ProxyConfig>,
    registry: Arc<SessionRegistry>,
    connectivity: Arc<dyn Connectivity>,
    events: broadcast::Sender<ProxyEvent>,
}

impl ProxyContext {
    pub(crate) fn new(
        config: Arc<ProxyConfig>,
        registry: Arc<SessionRegistry>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(ContextInner {
                config,
                registry,
                connectivity,
                events,
            }),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.inner.config.bind
    }

    pub fn motd(&self) -> &str {
        &self.inner.config.motd
    }

    /// The player cap in effect: the network's when
    /// [`sync_max_players`](ProxyConfig::sync_max_players) is set and the
    /// network reports one, otherwise the configured value.
    pub fn max_players(&self) -> u16 {
        if self.inner.config.sync_max_players {
            if let Some(max) = self.inner.connectivity.max_players() {
                return max;
            }
        }
        self.inner.config.max_players
    }

    pub fn sync_max_players(&self) -> bool {
        self.inner.config.sync_max_players
    }

    pub fn authenticate(&self) -> bool {
        self.inner.config.authenticate
    }

    pub fn player_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn online_players(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    pub fn session(&self, player: &str) -> Option<SessionHandle> {
        self.inner.registry.get_by_name(player)
    }

    pub fn session_state(&self, player: &str) -> Option<SessionState> {
        self.session(player).map(|session| session.state())
    }

    /// Asks the network to move `player` to `backend`.
    ///
    /// Goes through [`Connectivity::request_redirect`] so every proxy
    /// subscribed to the network sees the request, not only this one.
    pub fn redirect(&self, player: &str, backend: &str) {
        self.inner.connectivity.request_redirect(backend, player);
    }

    /// Disconnects `player` with `reason`. Returns `false` if nobody by
    /// that name is online.
    pub fn kick(&self, player: &str, reason: impl Into<String>) -> bool {
        match self.session(player) {
            Some(session) => session.request_kick(reason),
            None => false,
        }
    }

    /// Receives every [`ProxyEvent`] published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub(crate) fn connectivity(&self) -> &Arc<dyn Connectivity> {
        &self.inner.connectivity
    }

    pub(crate) fn emit(&self, event: ProxyEvent) {
        // No subscribers is not an error.
        let _ = self.inner.events.send(event);
    }
}

impl std::fmt::Debug for ProxyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyContext")
            .field("bind", &self.inner.config.bind)
            .field("players", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}
