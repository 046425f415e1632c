//! Integration tests for the echo handlers.
//!
//! # Purpose
//!
//! - `round_trip` gets back exactly the bytes it sent, even when several
//!   round trips share one connection.
//! - Send-only streams are drained without disturbing the connection.
//! - A stream the client aborts does not stop the server from echoing others.
//! - `serve_connection` returns once the client closes the connection.

use std::sync::Arc;
use std::time::Duration;

use braid_core::{Direction, ErrorCode};
use braid_echo::handler::{round_trip, serve_connection};
use braid_transport::{
    Connection, Connector, ConnectorOptions, Listener, ListenerOptions, PlainChannelProvider,
};
use tokio::task::JoinHandle;

const ALPN: &str = "echo";

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("operation timed out")
}

/// A client connected to a server running `serve_connection`.
struct EchoPair {
    _listener: Listener,
    client: Connection,
    server_task: JoinHandle<()>,
}

async fn echo_pair() -> EchoPair {
    let provider = Arc::new(PlainChannelProvider::new());
    let listener = Listener::bind(
        ListenerOptions {
            application_protocols: vec![ALPN.to_string()],
            ..Default::default()
        },
        provider.clone(),
    )
    .await
    .unwrap();
    let connector = Connector::new(
        ConnectorOptions {
            application_protocols: vec![ALPN.to_string()],
            ..Default::default()
        },
        provider,
    );

    let (client, server) = within(async {
        tokio::join!(connector.connect(listener.local_addr()), listener.accept())
    })
    .await;
    let server_task = tokio::spawn(serve_connection(server.unwrap()));
    EchoPair {
        _listener: listener,
        client: client.unwrap(),
        server_task,
    }
}

// ── Round trips ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_round_trip_returns_the_same_bytes() {
    // Arrange
    let pair = echo_pair().await;

    // Act
    let echoed = within(round_trip(&pair.client, b"hello braid", 1024))
        .await
        .unwrap();

    // Assert
    assert_eq!(echoed, b"hello braid");
}

#[tokio::test]
async fn test_concurrent_round_trips_do_not_mix() {
    let pair = echo_pair().await;

    let first = vec![b'a'; 40_000];
    let second = vec![b'b'; 40_000];

    let (a, b) = within(async {
        tokio::join!(
            round_trip(&pair.client, &first, 1 << 20),
            round_trip(&pair.client, &second, 1 << 20),
        )
    })
    .await;

    assert_eq!(a.unwrap(), first);
    assert_eq!(b.unwrap(), second);
}

// ── Other stream shapes ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_only_stream_is_drained() {
    // Arrange
    let pair = echo_pair().await;
    let stream = pair.client.open_stream(Direction::SendOnly).unwrap();

    // Act
    within(stream.write_all(b"fire and forget")).await.unwrap();
    within(stream.finish()).await.unwrap();

    // Assert – the connection is still usable afterwards
    let echoed = within(round_trip(&pair.client, b"still here", 64))
        .await
        .unwrap();
    assert_eq!(echoed, b"still here");
}

#[tokio::test]
async fn test_aborted_stream_leaves_other_streams_echoing() {
    // Arrange
    let pair = echo_pair().await;
    let doomed = pair.client.open_stream(Direction::Bidirectional).unwrap();
    within(doomed.write_all(b"partial")).await.unwrap();

    // Act
    doomed.abort(ErrorCode(3));

    // Assert
    let echoed = within(round_trip(&pair.client, b"next", 64)).await.unwrap();
    assert_eq!(echoed, b"next");
}

// ── Connection end ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_serve_connection_returns_when_the_client_closes() {
    // Arrange
    let pair = echo_pair().await;
    within(round_trip(&pair.client, b"bye", 16)).await.unwrap();

    // Act
    within(pair.client.close(ErrorCode::NO_ERROR)).await;

    // Assert
    within(pair.server_task).await.unwrap();
}
