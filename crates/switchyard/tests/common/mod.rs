//! Shared fixtures: a key pair, scripted backends, a test client, and a
//! proxy running on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use switchyard::prelude::*;
use switchyard_protocol::LinkFrame;
use switchyard::{KeyMaterial, ProxyServerBuilder};
use switchyard_transport::{ListenerCloser, TcpConnection, TcpTransport};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub const HOST: &str = "play.example.net";
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Largest frame the scripted backend echoes back verbatim.
pub const ECHO_LIMIT: usize = 4096;

/// One keypair per test binary; generating 2048-bit keys is slow.
pub fn keys() -> Arc<KeyMaterial> {
    static KEYS: OnceLock<Arc<KeyMaterial>> = OnceLock::new();
    Arc::clone(KEYS.get_or_init(|| Arc::new(KeyMaterial::generate().unwrap())))
}

pub fn test_config() -> ProxyConfig {
    ProxyConfig {
        bind: "127.0.0.1:0".into(),
        authenticate: false,
        extension_dir: "/nonexistent/switchyard-test-plugins".into(),
        ..ProxyConfig::default()
    }
}

// =========================================================================
// Scripted backend
// =========================================================================

/// A backend that answers every forwarded frame with `"<name>:<frame>"`.
///
/// Frames longer than [`ECHO_LIMIT`] are answered with
/// `"<name>:<len> bytes"` instead.
///
/// A frame of the form `kick:<reason>` makes it send
/// `Disconnect { reason }` instead, and `drop` makes it hang up.
pub struct MockBackend {
    pub name: String,
    pub addr: SocketAddr,
    /// `(player, host)` of every `ProxyLogin` received.
    pub logins: mpsc::UnboundedReceiver<(String, String)>,
    closer: ListenerCloser,
}

impl MockBackend {
    pub async fn spawn(name: &str) -> Self {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr();
        let closer = transport.closer();
        let (login_tx, logins) = mpsc::unbounded_channel();
        let backend_name = name.to_string();

        tokio::spawn(async move {
            while let Ok(conn) = transport.accept().await {
                let name = backend_name.clone();
                let login_tx = login_tx.clone();
                tokio::spawn(serve_backend_conn(conn, name, login_tx));
            }
        });

        Self {
            name: name.to_string(),
            addr,
            logins,
            closer,
        }
    }

    pub fn backend(&self) -> Backend {
        Backend::new(&self.name, self.addr.to_string())
    }

    pub async fn next_login(&mut self) -> (String, String) {
        tokio::time::timeout(TIMEOUT, self.logins.recv())
            .await
            .expect("backend login timed out")
            .expect("backend gone")
    }

    /// Stops accepting new links. Existing links keep working.
    pub fn stop(&self) {
        self.closer.close();
    }
}

async fn serve_backend_conn(
    conn: TcpConnection,
    name: String,
    logins: mpsc::UnboundedSender<(String, String)>,
) {
    let codec = JsonCodec;
    let Ok(Some(first)) = conn.recv().await else {
        return;
    };
    let Ok(LinkFrame::Control(Packet::ProxyLogin { name: player, host })) =
        LinkFrame::decode(first, &codec)
    else {
        return;
    };
    let _ = logins.send((player, host));

    while let Ok(Some(frame)) = conn.recv().await {
        let Ok(LinkFrame::Data(data)) = LinkFrame::decode(frame, &codec) else {
            continue;
        };
        let reply = if data.len() > ECHO_LIMIT {
            LinkFrame::Data(format!("{name}:{} bytes", data.len()).into_bytes())
        } else {
            let text = String::from_utf8_lossy(&data).into_owned();
            if let Some(reason) = text.strip_prefix("kick:") {
                LinkFrame::Control(Packet::Disconnect {
                    reason: reason.to_string(),
                })
            } else if text == "drop" {
                return;
            } else {
                LinkFrame::Data(format!("{name}:{text}").into_bytes())
            }
        };
        if conn.send(&reply.encode(&codec).unwrap()).await.is_err() {
            return;
        }
    }
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

// =========================================================================
// Test client
// =========================================================================

pub struct Client {
    conn: TcpConnection,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let conn = TcpConnection::connect(&addr.to_string()).await.unwrap();
        Self { conn }
    }

    /// Connects and completes an unauthenticated login as `name`.
    pub async fn login(addr: SocketAddr, name: &str) -> Self {
        let client = Self::connect(addr).await;
        client.send_login(name).await;
        match client.recv_packet().await {
            Packet::LoginSuccess { name: confirmed } => assert_eq!(confirmed, name),
            other => panic!("expected LoginSuccess, got {other:?}"),
        }
        client
    }

    pub async fn send_login(&self, name: &str) {
        self.send_packet(&Packet::Login {
            version: switchyard_protocol::PROTOCOL_VERSION,
            name: name.into(),
            host: HOST.into(),
        })
        .await;
    }

    pub async fn send_packet(&self, packet: &Packet) {
        self.conn
            .send(&JsonCodec.encode(packet).unwrap())
            .await
            .unwrap();
    }

    pub async fn recv_packet(&self) -> Packet {
        let frame = self.recv_raw().await.expect("connection closed");
        JsonCodec.decode(&frame).unwrap()
    }

    pub async fn send_raw(&self, data: &[u8]) {
        self.conn.send(data).await.unwrap();
    }

    pub async fn recv_raw(&self) -> Option<Vec<u8>> {
        tokio::time::timeout(TIMEOUT, self.conn.recv())
            .await
            .expect("recv timed out")
            .unwrap()
    }

    /// Sends `text` through the proxy and returns the backend's answer.
    pub async fn roundtrip(&self, text: &str) -> String {
        self.send_raw(text.as_bytes()).await;
        let reply = self.recv_raw().await.expect("connection closed");
        String::from_utf8(reply).unwrap()
    }

    /// Waits for the proxy to hang up.
    pub async fn expect_closed(&self) {
        assert!(self.recv_raw().await.is_none(), "expected the proxy to hang up");
    }
}

// =========================================================================
// Proxy under test
// =========================================================================

pub struct RunningProxy<A: Authenticator> {
    pub server: Arc<ProxyServer<A>>,
    pub addr: SocketAddr,
    pub task: JoinHandle<Result<(), ProxyError>>,
}

pub async fn start_proxy<A: Authenticator>(
    builder: ProxyServerBuilder,
    auth: A,
) -> RunningProxy<A> {
    let server = Arc::new(builder.key_material(keys()).build(auth).unwrap());
    let task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.listen_and_serve().await }
    });
    let addr = wait_for(|| server.local_addr()).await;
    RunningProxy { server, addr, task }
}

/// Polls `probe` until it returns `Some`.
pub async fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if let Some(value) = probe() {
            return value;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Waits until `pred` holds.
pub async fn wait_until(mut pred: impl FnMut() -> bool) {
    wait_for(|| pred().then_some(())).await;
}

/// Receives events until one matches `pred`.
pub async fn next_event(
    events: &mut broadcast::Receiver<ProxyEvent>,
    mut pred: impl FnMut(&ProxyEvent) -> bool,
) -> ProxyEvent {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received in time")
}
