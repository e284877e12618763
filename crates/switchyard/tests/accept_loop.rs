//! Accept-loop resilience, driven by a scripted transport on a paused
//! clock.

mod common;

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::{keys, test_config};
use switchyard::prelude::*;
use switchyard::{ACCEPT_RETRY_DELAY, ProxyServerBuilder};

// =========================================================================
// Scripted transport
// =========================================================================

/// A connection whose client hangs up immediately.
struct HangUp {
    id: ConnectionId,
}

impl Connection for HangUp {
    async fn send(&self, _data: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(None)
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

enum Step {
    Accept,
    Fail(io::ErrorKind),
}

/// Plays back `steps`, then reports the listener as closed.
struct Scripted {
    steps: VecDeque<Step>,
    next_id: Arc<AtomicU64>,
}

impl Scripted {
    fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Transport for Scripted {
    type Connection = HangUp;

    async fn accept(&mut self) -> Result<HangUp, TransportError> {
        match self.steps.pop_front() {
            Some(Step::Accept) => Ok(HangUp {
                id: ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst)),
            }),
            Some(Step::Fail(kind)) => Err(TransportError::AcceptFailed(kind.into())),
            None => Err(TransportError::Shutdown),
        }
    }
}

fn server() -> ProxyServer<AllowAll> {
    ProxyServerBuilder::new()
        .config(test_config())
        .key_material(keys())
        .build(AllowAll)
        .unwrap()
}

// =========================================================================
// serve()
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_serve_retries_transient_errors_after_delay() {
    let server = server();
    let transport = Scripted::new([
        Step::Fail(io::ErrorKind::ConnectionAborted),
        Step::Accept,
        Step::Fail(io::ErrorKind::ConnectionReset),
        Step::Accept,
    ]);
    let next_id = Arc::clone(&transport.next_id);
    let start = tokio::time::Instant::now();

    let result = server.serve(transport).await;

    assert!(result.is_ok(), "closed listener ends the loop cleanly: {result:?}");
    assert_eq!(next_id.load(Ordering::SeqCst), 3, "both connections accepted");
    assert!(start.elapsed() >= ACCEPT_RETRY_DELAY * 2);
}

#[tokio::test(start_paused = true)]
async fn test_serve_backs_off_once_per_consecutive_transient_error() {
    const FAILURES: u32 = 4;
    let server = server();
    let mut events = server.context().subscribe();
    let mut steps: Vec<Step> = (0..FAILURES)
        .map(|_| Step::Fail(io::ErrorKind::ConnectionAborted))
        .collect();
    steps.push(Step::Accept);
    let transport = Scripted::new(steps);
    let next_id = Arc::clone(&transport.next_id);
    let start = tokio::time::Instant::now();

    server.serve(transport).await.unwrap();

    assert_eq!(start.elapsed(), ACCEPT_RETRY_DELAY * FAILURES);
    assert_eq!(next_id.load(Ordering::SeqCst), 2, "exactly one connection accepted");
    match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
        Ok(Ok(ProxyEvent::SessionOpened { conn_id })) => {
            assert_eq!(conn_id, ConnectionId::new(1));
        }
        other => panic!("expected SessionOpened, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_serve_returns_non_transient_error() {
    let server = server();
    let transport = Scripted::new([
        Step::Accept,
        Step::Fail(io::ErrorKind::PermissionDenied),
        Step::Accept,
    ]);
    let next_id = Arc::clone(&transport.next_id);

    let result = server.serve(transport).await;

    assert!(matches!(
        result,
        Err(ProxyError::Transport(TransportError::AcceptFailed(_)))
    ));
    assert_eq!(next_id.load(Ordering::SeqCst), 2, "loop stops at the failure");
}

#[tokio::test(start_paused = true)]
async fn test_serve_spawns_session_per_connection() {
    let server = server();
    let mut events = server.context().subscribe();
    let transport = Scripted::new([Step::Accept, Step::Accept]);

    server.serve(transport).await.unwrap();

    let mut opened = Vec::new();
    while opened.len() < 2 {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(ProxyEvent::SessionOpened { conn_id })) => opened.push(conn_id),
            Ok(Ok(_)) => {}
            other => panic!("expected SessionOpened, got {other:?}"),
        }
    }
    opened.sort_by_key(|id| id.into_inner());
    assert_eq!(opened, vec![ConnectionId::new(1), ConnectionId::new(2)]);
}
