//! `ProxyServer` builder and accept loop.
//!
//! This is the entry point for running a Switchyard proxy. It ties
//! together all the layers: transport → protocol → session → backends.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use regex::Regex;
use switchyard_protocol::JsonCodec;
use switchyard_session::{Authenticator, SessionRegistry};
use switchyard_transport::{ListenerCloser, TcpTransport, Transport, TransportError};

use crate::ProxyError;
use crate::config::ProxyConfig;
use crate::connect::{
    BackendDirectory, Connectivity, Localizer, RedirectHandler, Router, StaticLocalizer,
    StaticRouter,
};
use crate::context::ProxyContext;
use crate::extension::{Extension, ExtensionLoader, LoadReport, ModuleOpener};
use crate::handler::handle_connection;
use crate::keys::KeyMaterial;

/// Pause after a transient accept error before accepting again.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Shared server state passed to each session task.
pub(crate) struct ProxyState<A: Authenticator> {
    pub(crate) config: Arc<ProxyConfig>,
    pub(crate) kick_pattern: Regex,
    pub(crate) keys: Arc<KeyMaterial>,
    pub(crate) router: Arc<dyn Router>,
    pub(crate) localizer: Arc<dyn Localizer>,
    pub(crate) context: ProxyContext,
    pub(crate) auth: A,
    pub(crate) codec: JsonCodec,
}

/// Bridges redirect requests from the network to the sessions of this
/// proxy.
struct RedirectRelay {
    registry: Arc<SessionRegistry>,
    // Weak: the connectivity collaborator owns this relay.
    connectivity: Weak<dyn Connectivity>,
}

impl RedirectHandler for RedirectRelay {
    fn on_redirect_requested(&self, backend_name: &str, player_name: &str) {
        let Some(session) = self.registry.get_by_name(player_name) else {
            tracing::debug!(player = player_name, "redirect for player not on this proxy");
            return;
        };
        let Some(connectivity) = self.connectivity.upgrade() else {
            return;
        };
        let Some(backend) = connectivity.backend(backend_name) else {
            tracing::debug!(backend = backend_name, player = player_name, "redirect to unknown backend");
            return;
        };
        if !session.request_redirect(backend) {
            tracing::debug!(player = player_name, "session closed or busy, redirect dropped");
        }
    }
}

/// Builder for configuring and constructing a [`ProxyServer`].
///
/// # Example
///
/// ```rust,ignore
/// use switchyard::prelude::*;
///
/// let server = ProxyServerBuilder::new()
///     .config(ProxyConfig { bind: "0.0.0.0:25565".into(), ..Default::default() })
///     .router(StaticRouter::new().fallback(["lobby"]))
///     .connectivity(directory)
///     .build(AllowAll)?;
/// server.listen_and_serve().await
/// ```
#[derive(Default)]
pub struct ProxyServerBuilder {
    config: ProxyConfig,
    router: Option<Arc<dyn Router>>,
    localizer: Option<Arc<dyn Localizer>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    keys: Option<Arc<KeyMaterial>>,
    extensions: Vec<Box<dyn Extension>>,
    opener: Option<Box<dyn ModuleOpener>>,
}

impl ProxyServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ProxyConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the router. Without one every login is refused for lack of a
    /// backend.
    pub fn router(mut self, router: impl Router) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    pub fn localizer(mut self, localizer: impl Localizer) -> Self {
        self.localizer = Some(Arc::new(localizer));
        self
    }

    /// Sets the backend network. Defaults to an empty [`BackendDirectory`].
    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Uses an existing keypair instead of generating one.
    pub fn key_material(mut self, keys: Arc<KeyMaterial>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Adds an extension compiled into the binary. Initialized before any
    /// module from the extension directory.
    pub fn extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    /// Replaces the dynamic loader used for the extension directory.
    pub fn module_opener(mut self, opener: impl ModuleOpener + 'static) -> Self {
        self.opener = Some(Box::new(opener));
        self
    }

    /// Builds the server with the given authenticator.
    ///
    /// In order: compiles the kick pattern, generates the keypair,
    /// subscribes to redirect requests, and loads extensions. Extension
    /// problems are logged and never fail construction.
    ///
    /// # Errors
    /// - [`ProxyError::InvalidConfig`] for out-of-range settings.
    /// - [`ProxyError::InvalidKickPattern`] if the pattern does not compile.
    /// - [`ProxyError::KeyGeneration`] / [`ProxyError::KeyEncoding`] if
    ///   the keypair cannot be produced.
    pub fn build<A: Authenticator>(self, auth: A) -> Result<ProxyServer<A>, ProxyError> {
        self.config.validate()?;
        let kick_pattern =
            Regex::new(&self.config.kick_pattern).map_err(ProxyError::InvalidKickPattern)?;
        let keys = match self.keys {
            Some(keys) => keys,
            None => Arc::new(KeyMaterial::generate()?),
        };

        let config = Arc::new(self.config);
        let registry = Arc::new(SessionRegistry::new());
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| Arc::new(BackendDirectory::new()));
        connectivity.on_redirect_requested(Arc::new(RedirectRelay {
            registry: Arc::clone(&registry),
            connectivity: Arc::downgrade(&connectivity),
        }));
        let context = ProxyContext::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&connectivity),
        );

        let mut loader = match self.opener {
            Some(opener) => ExtensionLoader::with_opener(opener),
            None => ExtensionLoader::new(),
        };
        for extension in self.extensions {
            if let Err(e) = loader.register(extension, &context) {
                tracing::warn!(error = %e, "skipping built-in extension");
            }
        }
        let report = loader.load_all(&config.extension_dir, &context);
        tracing::info!(
            dir = %config.extension_dir.display(),
            loaded = report.loaded_count(),
            failed = report.failures.len(),
            "extensions loaded"
        );

        let state = ProxyState {
            config,
            kick_pattern,
            keys,
            router: self
                .router
                .unwrap_or_else(|| Arc::new(StaticRouter::new())),
            localizer: self
                .localizer
                .unwrap_or_else(|| Arc::new(StaticLocalizer::default())),
            context,
            auth,
            codec: JsonCodec,
        };

        Ok(ProxyServer {
            state: Arc::new(state),
            listener: Mutex::new(None),
            extensions: loader,
            extension_report: report,
        })
    }
}

/// The listener currently serving, if any.
struct Listener {
    closer: ListenerCloser,
    local_addr: SocketAddr,
}

/// A Switchyard proxy.
///
/// Call [`listen_and_serve()`](Self::listen_and_serve) to start accepting
/// connections and [`close()`](Self::close) from another task to stop.
pub struct ProxyServer<A: Authenticator> {
    state: Arc<ProxyState<A>>,
    listener: Mutex<Option<Listener>>,
    extensions: ExtensionLoader,
    extension_report: LoadReport,
}

impl<A: Authenticator> ProxyServer<A> {
    /// Creates a new builder.
    pub fn builder() -> ProxyServerBuilder {
        ProxyServerBuilder::new()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.state.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.state.config.bind
    }

    pub fn motd(&self) -> &str {
        &self.state.config.motd
    }

    /// The player cap in effect; see [`ProxyContext::max_players`].
    pub fn max_players(&self) -> u16 {
        self.state.context.max_players()
    }

    pub fn sync_max_players(&self) -> bool {
        self.state.config.sync_max_players
    }

    pub fn authenticate(&self) -> bool {
        self.state.config.authenticate
    }

    /// The compiled kick-message pattern.
    pub fn kick_pattern(&self) -> &Regex {
        &self.state.kick_pattern
    }

    pub fn public_key_der(&self) -> &[u8] {
        self.state.keys.public_key_der()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.state.context.registry()
    }

    /// The handle extensions receive.
    pub fn context(&self) -> ProxyContext {
        self.state.context.clone()
    }

    /// What happened when the extension directory was loaded.
    pub fn extension_report(&self) -> &LoadReport {
        &self.extension_report
    }

    /// Number of initialized extensions.
    pub fn extension_count(&self) -> usize {
        self.extensions.len()
    }

    /// Address of the listener opened by
    /// [`listen_and_serve`](Self::listen_and_serve), once it is open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener().as_ref().map(|l| l.local_addr)
    }

    /// Binds the configured address and serves until closed.
    ///
    /// # Errors
    /// Fails if the address cannot be bound or the listener fails with a
    /// non-transient error.
    pub async fn listen_and_serve(&self) -> Result<(), ProxyError> {
        let transport = TcpTransport::bind(&self.state.config.bind).await?;
        tracing::info!(addr = %transport.local_addr(), "proxy listening");
        *self.listener() = Some(Listener {
            closer: transport.closer(),
            local_addr: transport.local_addr(),
        });
        self.serve(transport).await
    }

    /// Runs the accept loop on `transport`.
    ///
    /// Transient accept errors are logged and retried after
    /// [`ACCEPT_RETRY_DELAY`]. Any other error ends the loop and is
    /// returned, except [`TransportError::Shutdown`], which means the
    /// listener was closed on purpose and ends the loop with `Ok(())`.
    ///
    /// Sessions already running are not affected when the loop ends.
    pub async fn serve<T: Transport>(&self, mut transport: T) -> Result<(), ProxyError> {
        tracing::info!("Switchyard proxy running");

        loop {
            match transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        error = %e,
                        retry_in = ?ACCEPT_RETRY_DELAY,
                        "transient accept error"
                    );
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
                Err(TransportError::Shutdown) => {
                    tracing::info!("listener closed, accept loop stopped");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Stops the listener opened by
    /// [`listen_and_serve`](Self::listen_and_serve).
    ///
    /// Idempotent, and a no-op if the server never listened.
    pub fn close(&self) {
        if let Some(listener) = self.listener().take() {
            tracing::info!(addr = %listener.local_addr, "closing listener");
            listener.closer.close();
        }
    }

    fn listener(&self) -> std::sync::MutexGuard<'_, Option<Listener>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: Authenticator> std::fmt::Debug for ProxyServer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("bind", &self.state.config.bind)
            .field("local_addr", &self.local_addr())
            .field("extensions", &self.extensions.len())
            .finish_non_exhaustive()
    }
}
