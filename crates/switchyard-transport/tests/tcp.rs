//! Integration tests for the TCP transport.
//!
//! These spin up a real listener on a random port and talk to it with a
//! real client socket.

use std::time::Duration;

use switchyard_transport::{
    Connection, TcpConnection, TcpTransport, Transport, TransportError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn test_tcp_accept_and_send_receive() {
    let mut transport = TcpTransport::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = transport.local_addr().to_string();

    let server_handle =
        tokio::spawn(async move { transport.accept().await.expect("should accept") });

    let client = TcpConnection::connect(&addr).await.expect("should connect");
    let server_conn = server_handle.await.expect("task should complete");

    assert!(server_conn.id().into_inner() > 0);
    assert_ne!(server_conn.id(), client.id());

    server_conn
        .send(b"hello from proxy")
        .await
        .expect("send should succeed");
    let frame = client.recv().await.expect("recv").expect("frame");
    assert_eq!(frame, b"hello from proxy");

    client.send(b"hello from client").await.expect("send");
    let frame = server_conn.recv().await.expect("recv").expect("frame");
    assert_eq!(frame, b"hello from client");
}

#[tokio::test]
async fn test_tcp_recv_returns_none_on_clean_close() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().to_string();
    let accept = tokio::spawn(async move { transport.accept().await.unwrap() });

    let client = TcpConnection::connect(&addr).await.unwrap();
    let server_conn = accept.await.unwrap();

    client.close().await.expect("close should succeed");

    let result = server_conn.recv().await.expect("clean close is not an error");
    assert!(result.is_none());
}

#[tokio::test]
async fn test_tcp_frames_are_length_prefixed() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().to_string();
    let accept = tokio::spawn(async move { transport.accept().await.unwrap() });

    let mut raw = tokio::net::TcpStream::connect(&addr).await.unwrap();
    let server_conn = accept.await.unwrap();

    // Two frames written in a single burst must come out as two frames.
    let mut burst = Vec::new();
    burst.extend_from_slice(&3u32.to_be_bytes());
    burst.extend_from_slice(b"abc");
    burst.extend_from_slice(&2u32.to_be_bytes());
    burst.extend_from_slice(b"de");
    raw.write_all(&burst).await.unwrap();

    assert_eq!(server_conn.recv().await.unwrap().unwrap(), b"abc");
    assert_eq!(server_conn.recv().await.unwrap().unwrap(), b"de");

    server_conn.send(b"xyz").await.unwrap();
    let mut header = [0u8; 4];
    raw.read_exact(&mut header).await.unwrap();
    assert_eq!(u32::from_be_bytes(header), 3);
}

#[tokio::test]
async fn test_tcp_recv_rejects_oversized_frame() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().to_string();
    let accept = tokio::spawn(async move { transport.accept().await.unwrap() });

    let mut raw = tokio::net::TcpStream::connect(&addr).await.unwrap();
    let server_conn = accept.await.unwrap();

    raw.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

    let result = server_conn.recv().await;
    assert!(matches!(result, Err(TransportError::FrameTooLarge(_))));
}

#[tokio::test]
async fn test_closer_interrupts_pending_accept() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let closer = transport.closer();

    let accept = tokio::spawn(async move { transport.accept().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    closer.close();

    let result = tokio::time::timeout(Duration::from_secs(1), accept)
        .await
        .expect("accept should return promptly")
        .expect("task should not panic");
    match result {
        Err(e) => {
            assert!(matches!(e, TransportError::Shutdown));
            assert!(!e.is_transient(), "shutdown must end the accept loop");
        }
        Ok(_) => panic!("accept should fail after close"),
    }
}

#[tokio::test]
async fn test_closer_is_idempotent_and_sticky() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let closer = transport.closer();

    closer.close();
    closer.close();
    assert!(closer.is_closed());

    assert!(matches!(
        transport.accept().await,
        Err(TransportError::Shutdown)
    ));
}

#[tokio::test]
async fn test_connect_to_unbound_port_fails() {
    // Bind then drop to get a port that is very likely free.
    let addr = {
        let t = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        t.local_addr().to_string()
    };

    let result = TcpConnection::connect(&addr).await;
    assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
}
