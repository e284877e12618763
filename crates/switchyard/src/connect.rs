//! Collaborator seams: where backends come from, which backend a player
//! lands on, and what the proxy says when it refuses someone.
//!
//! The server only ever talks to the traits in this module. The `Static*`
//! types and [`BackendDirectory`] are in-process implementations good
//! enough for a single proxy fed by a config file.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use switchyard_session::Backend;

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// Receives redirect requests published through [`Connectivity`].
///
/// May be invoked from any thread, including one the connectivity
/// implementation owns, so it must not block.
pub trait RedirectHandler: Send + Sync {
    fn on_redirect_requested(&self, backend_name: &str, player_name: &str);
}

/// The proxy's view of the backend network.
pub trait Connectivity: Send + Sync + 'static {
    /// Resolves a backend by name.
    fn backend(&self, name: &str) -> Option<Backend>;

    /// Subscribes `handler` to redirect requests.
    fn on_redirect_requested(&self, handler: Arc<dyn RedirectHandler>);

    /// Publishes a request to move `player_name` to `backend_name`.
    fn request_redirect(&self, backend_name: &str, player_name: &str);

    /// Network-wide player cap, if the network has one.
    fn max_players(&self) -> Option<u16> {
        None
    }
}

/// In-memory [`Connectivity`]: a name → address table plus a list of
/// redirect subscribers.
#[derive(Default)]
pub struct BackendDirectory {
    backends: DashMap<String, Backend>,
    handlers: RwLock<Vec<Arc<dyn RedirectHandler>>>,
    max_players: RwLock<Option<u16>>,
}

impl BackendDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a backend.
    pub fn insert(&self, backend: Backend) {
        tracing::debug!(backend = %backend.name, addr = %backend.addr, "backend registered");
        self.backends.insert(backend.name.clone(), backend);
    }

    /// Removes a backend. Players already on it are unaffected.
    pub fn remove(&self, name: &str) -> Option<Backend> {
        self.backends.remove(name).map(|(_, backend)| backend)
    }

    pub fn set_max_players(&self, max_players: Option<u16>) {
        *self
            .max_players
            .write()
            .unwrap_or_else(PoisonError::into_inner) = max_players;
    }

    /// Names of every known backend, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.backends.iter().map(|e| e.key().clone()).collect()
    }
}

impl Connectivity for BackendDirectory {
    fn backend(&self, name: &str) -> Option<Backend> {
        self.backends.get(name).map(|e| e.value().clone())
    }

    fn on_redirect_requested(&self, handler: Arc<dyn RedirectHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn request_redirect(&self, backend_name: &str, player_name: &str) {
        // Snapshot so a handler can subscribe or publish without deadlocking.
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        tracing::debug!(
            backend = backend_name,
            player = player_name,
            subscribers = handlers.len(),
            "redirect requested"
        );
        for handler in handlers {
            handler.on_redirect_requested(backend_name, player_name);
        }
    }

    fn max_players(&self) -> Option<u16> {
        *self.max_players.read().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Picks the backends a new player may land on, in order of preference.
pub trait Router: Send + Sync + 'static {
    /// Candidate backend names for a client that connected to `host`.
    /// An empty list means there is nowhere to send the player.
    fn route(&self, host: &str) -> Vec<String>;
}

/// Host name used for the catch-all route.
pub const DEFAULT_ROUTE: &str = "*";

/// Fixed host → backends table.
///
/// Hosts are matched case-insensitively with any `:port` suffix and
/// trailing dot removed. Hosts without an entry use the [`DEFAULT_ROUTE`].
#[derive(Debug, Clone, Default)]
pub struct StaticRouter {
    routes: HashMap<String, Vec<String>>,
}

impl StaticRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route for `host`.
    pub fn route_host(
        mut self,
        host: &str,
        backends: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.routes.insert(
            normalize_host(host),
            backends.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Sets the catch-all route.
    pub fn fallback(self, backends: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.route_host(DEFAULT_ROUTE, backends)
    }
}

impl Router for StaticRouter {
    fn route(&self, host: &str) -> Vec<String> {
        self.routes
            .get(&normalize_host(host))
            .or_else(|| self.routes.get(DEFAULT_ROUTE))
            .cloned()
            .unwrap_or_default()
    }
}

fn normalize_host(host: &str) -> String {
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Localizer
// ---------------------------------------------------------------------------

/// Message keys the proxy localizes.
pub mod locale {
    pub const SERVER_FULL: &str = "serverFull";
    pub const AUTH_FAILED: &str = "authFailed";
    pub const NO_BACKEND: &str = "noBackend";
    pub const LOST_CONNECTION: &str = "lostConnection";
    pub const ALREADY_ONLINE: &str = "alreadyOnline";
    pub const HANDSHAKE_FAILED: &str = "handshakeFailed";
    pub const OUTDATED: &str = "outdated";
    pub const INVALID_NAME: &str = "invalidName";
}

/// Turns a message key into text shown to a player.
pub trait Localizer: Send + Sync + 'static {
    fn localize(&self, key: &str) -> String;
}

/// Key → text table with English defaults. Unknown keys come back as
/// the key itself.
#[derive(Debug, Clone)]
pub struct StaticLocalizer {
    messages: HashMap<String, String>,
}

impl StaticLocalizer {
    /// Overrides the text for `key`.
    pub fn with(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.messages.insert(key.into(), text.into());
        self
    }
}

impl Default for StaticLocalizer {
    fn default() -> Self {
        let messages = [
            (locale::SERVER_FULL, "The server is full."),
            (locale::AUTH_FAILED, "Could not verify your identity."),
            (locale::NO_BACKEND, "No server is available right now."),
            (locale::LOST_CONNECTION, "Lost connection to the server."),
            (locale::ALREADY_ONLINE, "You are already connected."),
            (locale::HANDSHAKE_FAILED, "Login failed."),
            (locale::OUTDATED, "Your client is not supported."),
            (locale::INVALID_NAME, "That player name is not allowed."),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { messages }
    }
}

impl Extend<(String, String)> for StaticLocalizer {
    fn extend<I: IntoIterator<Item = (String, String)>>(&mut self, iter: I) {
        self.messages.extend(iter);
    }
}

impl Localizer for StaticLocalizer {
    fn localize(&self, key: &str) -> String {
        self.messages
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, String)>>);

    impl RedirectHandler for Recorder {
        fn on_redirect_requested(&self, backend_name: &str, player_name: &str) {
            self.0
                .lock()
                .unwrap()
                .push((backend_name.to_string(), player_name.to_string()));
        }
    }

    // =====================================================================
    // BackendDirectory
    // =====================================================================

    #[test]
    fn test_backend_lookup_by_name() {
        let directory = BackendDirectory::new();
        directory.insert(Backend::new("lobby", "127.0.0.1:25566"));

        assert_eq!(directory.backend("lobby").unwrap().addr, "127.0.0.1:25566");
        assert!(directory.backend("survival").is_none());
    }

    #[test]
    fn test_request_redirect_reaches_every_subscriber() {
        let directory = BackendDirectory::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        directory.on_redirect_requested(first.clone());
        directory.on_redirect_requested(second.clone());

        directory.request_redirect("lobby", "Alice");

        let expected = vec![("lobby".to_string(), "Alice".to_string())];
        assert_eq!(*first.0.lock().unwrap(), expected);
        assert_eq!(*second.0.lock().unwrap(), expected);
    }

    #[test]
    fn test_request_redirect_without_subscribers_is_noop() {
        let directory = BackendDirectory::new();
        directory.request_redirect("lobby", "Alice");
    }

    #[test]
    fn test_max_players_defaults_to_none() {
        let directory = BackendDirectory::new();
        assert_eq!(directory.max_players(), None);
        directory.set_max_players(Some(500));
        assert_eq!(directory.max_players(), Some(500));
    }

    // =====================================================================
    // StaticRouter
    // =====================================================================

    #[test]
    fn test_route_matches_host_ignoring_port_and_case() {
        let router = StaticRouter::new()
            .route_host("minigames.example.net", ["games-1", "games-2"])
            .fallback(["lobby"]);

        assert_eq!(
            router.route("MiniGames.Example.Net.:25565"),
            vec!["games-1".to_string(), "games-2".to_string()]
        );
    }

    #[test]
    fn test_route_unknown_host_uses_fallback() {
        let router = StaticRouter::new().fallback(["lobby"]);
        assert_eq!(router.route("whatever"), vec!["lobby".to_string()]);
    }

    #[test]
    fn test_route_without_fallback_is_empty() {
        let router = StaticRouter::new().route_host("a.example", ["a"]);
        assert!(router.route("b.example").is_empty());
    }

    // =====================================================================
    // StaticLocalizer
    // =====================================================================

    #[test]
    fn test_localize_known_key() {
        let localizer = StaticLocalizer::default();
        assert_eq!(localizer.localize(locale::SERVER_FULL), "The server is full.");
    }

    #[test]
    fn test_localize_override_and_unknown_key() {
        let localizer = StaticLocalizer::default().with(locale::SERVER_FULL, "Plein.");
        assert_eq!(localizer.localize(locale::SERVER_FULL), "Plein.");
        assert_eq!(localizer.localize("notAKey"), "notAKey");
    }
}
