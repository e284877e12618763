//! # Switchyard
//!
//! Proxy core for game networks: one public endpoint in front of many
//! backend game servers.
//!
//! The proxy accepts client connections, runs the login handshake
//! (optionally with an RSA encryption exchange and an [`Authenticator`]
//! check), keeps a directory of who is online, and attaches each player to
//! a backend picked by a [`Router`]. A player can be moved to another
//! backend at any time without their client reconnecting: anything that
//! can reach the [`Connectivity`] collaborator may request it, including
//! extensions loaded from the extension directory at startup.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use switchyard::prelude::*;
//!
//! # async fn run() -> Result<(), ProxyError> {
//! let directory = Arc::new(BackendDirectory::new());
//! directory.insert(Backend::new("lobby", "10.0.0.2:25565"));
//!
//! let server = ProxyServerBuilder::new()
//!     .config(ProxyConfig::default())
//!     .router(StaticRouter::new().fallback(["lobby"]))
//!     .connectivity(directory)
//!     .build(AllowAll)?;
//! server.listen_and_serve().await
//! # }
//! ```

mod config;
mod connect;
mod context;
mod error;
mod extension;
mod handler;
mod keys;
mod link;
mod server;

pub use config::{DEFAULT_EXTENSION_DIR, DEFAULT_KICK_PATTERN, ProxyConfig};
pub use connect::{
    BackendDirectory, Connectivity, DEFAULT_ROUTE, Localizer, RedirectHandler, Router,
    StaticLocalizer, StaticRouter, locale,
};
pub use context::{EVENT_BUFFER, ProxyContext, ProxyEvent};
pub use error::ProxyError;
pub use extension::{
    DylibOpener, ENTRY_SYMBOL, EntryPoint, Extension, ExtensionError, ExtensionLoader, LoadReport,
    MODULE_SUFFIX, ModuleOpener,
};
pub use handler::SESSION_KEY_LEN;
pub use keys::{KEY_BITS, KeyMaterial};
pub use server::{ACCEPT_RETRY_DELAY, ProxyServer, ProxyServerBuilder};

pub use switchyard_session::{
    AllowAll, AuthRequest, Authenticator, Backend, SessionError, SessionHandle, SessionRegistry,
    SessionState, SessionStatus,
};

/// Re-exports everything needed to configure and run a proxy or write an
/// extension.
pub mod prelude {
    pub use crate::{
        AllowAll, AuthRequest, Authenticator, Backend, BackendDirectory, Connectivity, Extension,
        Localizer, ProxyConfig, ProxyContext, ProxyError, ProxyEvent, ProxyServer, ProxyServerBuilder,
        RedirectHandler, Router, SessionError, SessionHandle, SessionState, StaticLocalizer,
        StaticRouter,
    };
    pub use switchyard_protocol::{Codec, JsonCodec, LinkFrame, Packet};
    pub use switchyard_transport::{Connection, ConnectionId, Transport, TransportError};
}
