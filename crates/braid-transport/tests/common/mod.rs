//! Shared fixtures for the braid-transport integration tests.
//!
//! Every test runs a real `Listener` and `Connector` on loopback with the
//! `PlainChannelProvider`, so the whole stack (handshake, preface, reader and
//! writer tasks) is exercised exactly as an application would use it.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use braid_transport::{
    Connection, Connector, ConnectorOptions, Listener, ListenerOptions, PlainChannelProvider,
    TransportConfig,
};

pub const ALPN: &str = "braid-test";

/// Upper bound for any single wait in these tests.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Awaits `fut`, failing the test instead of hanging if it never completes.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(STEP_TIMEOUT, fut)
        .await
        .expect("operation timed out")
}

pub async fn bind_listener(transport: TransportConfig) -> Listener {
    Listener::bind(
        ListenerOptions {
            application_protocols: vec![ALPN.to_string()],
            transport,
            ..Default::default()
        },
        Arc::new(PlainChannelProvider::new()),
    )
    .await
    .expect("bind loopback listener")
}

pub fn connector(transport: TransportConfig) -> Connector {
    Connector::new(
        ConnectorOptions {
            application_protocols: vec![ALPN.to_string()],
            server_name: Some("localhost".to_string()),
            transport,
        },
        Arc::new(PlainChannelProvider::new()),
    )
}

/// A connected client/server pair plus the listener and connector that own
/// their registries.
pub struct Pair {
    pub listener: Listener,
    pub connector: Connector,
    pub client: Connection,
    pub server: Connection,
}

pub async fn connected_pair_with(server_cfg: TransportConfig, client_cfg: TransportConfig) -> Pair {
    let listener = bind_listener(server_cfg).await;
    let connector = connector(client_cfg);

    let (client, server) = within(async {
        tokio::join!(
            connector.connect(listener.local_addr()),
            listener.accept()
        )
    })
    .await;

    Pair {
        client: client.expect("client connect"),
        server: server.expect("server accept"),
        listener,
        connector,
    }
}

pub async fn connected_pair() -> Pair {
    connected_pair_with(TransportConfig::default(), TransportConfig::default()).await
}
