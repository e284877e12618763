//! TCP transport with length-prefixed frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Largest frame payload either side may send (2 MiB).
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A TCP [`Transport`] that listens for incoming connections.
///
/// The listening socket lives exactly as long as this value. Closing it
/// from another task goes through the [`ListenerCloser`] obtained from
/// [`closer`](Self::closer): any pending or future `accept` then fails
/// with [`TransportError::Shutdown`], which is not transient, so an accept
/// loop built on [`TransportError::is_transient`] exits and drops the
/// transport.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    closed: watch::Receiver<bool>,
    closer: ListenerCloser,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        let local_addr =
            listener.local_addr().map_err(TransportError::BindFailed)?;
        let (tx, closed) = watch::channel(false);
        tracing::info!(%local_addr, "TCP transport listening");
        Ok(Self {
            listener,
            local_addr,
            closed,
            closer: ListenerCloser { tx: Arc::new(tx) },
        })
    }

    /// Returns the address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a handle that can stop this listener from another task.
    pub fn closer(&self) -> ListenerCloser {
        self.closer.clone()
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;

    async fn accept(&mut self) -> Result<Self::Connection, TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::Shutdown);
        }
        tokio::select! {
            accepted = self.listener.accept() => {
                let (stream, peer) =
                    accepted.map_err(TransportError::AcceptFailed)?;
                let conn = TcpConnection::from_stream(stream, peer);
                tracing::debug!(id = %conn.id, %peer, "accepted TCP connection");
                Ok(conn)
            }
            _ = self.closed.wait_for(|closed| *closed) => {
                Err(TransportError::Shutdown)
            }
        }
    }
}

/// Stops a [`TcpTransport`] from outside its accept loop.
///
/// Cheap to clone. Closing is idempotent.
#[derive(Clone)]
pub struct ListenerCloser {
    tx: Arc<watch::Sender<bool>>,
}

impl ListenerCloser {
    /// Makes the listener's pending and future accepts fail with
    /// [`TransportError::Shutdown`].
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A single framed TCP connection.
///
/// Reading and writing use separate halves of the socket, so one task can
/// sit in [`recv`](Connection::recv) while another sends.
pub struct TcpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpConnection {
    /// Dials a remote peer.
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await.map_err(|source| {
            TransportError::ConnectFailed {
                addr: addr.to_string(),
                source,
            }
        })?;
        let peer = stream.peer_addr().map_err(|source| {
            TransportError::ConnectFailed {
                addr: addr.to_string(),
                source,
            }
        })?;
        Ok(Self::from_stream(stream, peer))
    }

    fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        // Frames are small and latency-sensitive.
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self {
            id: ConnectionId::new(
                NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            ),
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    /// Returns the remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Connection for TcpConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(data.len()));
        }
        let mut frame = Vec::with_capacity(4 + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
        frame.extend_from_slice(data);
        self.writer
            .lock()
            .await
            .write_all(&frame)
            .await
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut reader = self.reader.lock().await;
        let len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(TransportError::ReceiveFailed(e)),
        };
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }
        let mut payload = vec![0u8; len];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        Ok(Some(payload))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
