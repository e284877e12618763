//! Transport abstraction layer for Switchyard.
//!
//! Provides the [`Transport`] and [`Connection`] traits the proxy's accept
//! loop and sessions are written against, plus the TCP implementation used
//! in production.
//!
//! Connections are message-oriented: every [`Connection::recv`] yields one
//! complete frame. On TCP a frame is a 4-byte big-endian length followed by
//! that many payload bytes. What the payload means is up to the layers
//! above.
//!
//! Trait methods return `impl Future + Send` rather than being plain
//! `async fn`s so that code generic over a connection type can still be
//! handed to `tokio::spawn`.

mod error;
mod tcp;

pub use error::TransportError;
pub use tcp::{ListenerCloser, TcpConnection, TcpTransport, MAX_FRAME_LEN};

use std::fmt;
use std::future::Future;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    ///
    /// Callers decide whether to retry a failure with
    /// [`TransportError::is_transient`].
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A single connection that can send and receive frames.
pub trait Connection: Send + Sync + 'static {
    /// Sends one frame to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
