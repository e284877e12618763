//! Connection plumbing shared by the client side and the backend side of a
//! session.

use std::sync::Arc;
use std::time::Duration;

use switchyard_protocol::{Codec, LINK_HEADER_LEN, LinkFrame, Packet};
use switchyard_session::Backend;
use switchyard_transport::{Connection, MAX_FRAME_LEN, TcpConnection, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ProxyError;

/// Frames read ahead of the session task per connection.
const FRAME_BUFFER: usize = 64;

/// Largest client frame that still fits on a backend link once wrapped.
pub(crate) const MAX_FORWARD_LEN: usize = MAX_FRAME_LEN - LINK_HEADER_LEN;

/// Reads frames off a connection on a dedicated task.
///
/// `Connection::recv` is not cancel-safe, so it cannot sit directly in a
/// `select!` next to other branches. The pump owns the read side and hands
/// complete frames over a channel, which is. The reader task is aborted
/// when the pump is dropped.
pub(crate) struct FramePump {
    frames: mpsc::Receiver<Vec<u8>>,
    task: JoinHandle<()>,
}

impl FramePump {
    pub(crate) fn spawn<C: Connection>(conn: Arc<C>) -> Self {
        let (tx, frames) = mpsc::channel(FRAME_BUFFER);
        let task = tokio::spawn(async move {
            loop {
                match conn.recv().await {
                    Ok(Some(frame)) => {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(conn_id = %conn.id(), error = %e, "read failed");
                        break;
                    }
                }
            }
        });
        Self { frames, task }
    }

    /// Next frame, or `None` once the peer is gone.
    pub(crate) async fn recv(&mut self) -> Option<Vec<u8>> {
        self.frames.recv().await
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The proxy's connection to one backend on behalf of one player.
pub(crate) struct BackendLink {
    backend: Backend,
    conn: Arc<TcpConnection>,
    inbound: FramePump,
}

impl BackendLink {
    /// Dials `backend` and introduces the player with
    /// [`Packet::ProxyLogin`].
    pub(crate) async fn open(
        backend: Backend,
        player: &str,
        host: &str,
        connect_timeout: Duration,
        codec: &impl Codec,
    ) -> Result<Self, ProxyError> {
        let conn = match tokio::time::timeout(
            connect_timeout,
            TcpConnection::connect(&backend.addr),
        )
        .await
        {
            Ok(conn) => conn?,
            Err(_) => {
                return Err(TransportError::ConnectFailed {
                    addr: backend.addr.clone(),
                    source: std::io::ErrorKind::TimedOut.into(),
                }
                .into());
            }
        };

        let hello = LinkFrame::Control(Packet::ProxyLogin {
            name: player.to_string(),
            host: host.to_string(),
        })
        .encode(codec)?;
        conn.send(&hello).await?;

        tracing::debug!(
            backend = %backend.name,
            addr = %backend.addr,
            player,
            "backend link open"
        );

        let conn = Arc::new(conn);
        let inbound = FramePump::spawn(Arc::clone(&conn));
        Ok(Self {
            backend,
            conn,
            inbound,
        })
    }

    pub(crate) fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Forwards one frame of game traffic. `data` must be at most
    /// [`MAX_FORWARD_LEN`] bytes, so the only way this fails is the backend
    /// connection itself.
    pub(crate) async fn send_data(&self, data: &[u8]) -> Result<(), TransportError> {
        debug_assert!(data.len() <= MAX_FORWARD_LEN);
        self.conn.send(&LinkFrame::encode_data(data)).await
    }

    pub(crate) async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound.recv().await
    }

    pub(crate) async fn close(self) {
        let _ = self.conn.close().await;
        tracing::debug!(backend = %self.backend.name, "backend link closed");
    }
}
