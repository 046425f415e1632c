//! `Listener` (server side) and `Connector` (client side).
//!
//! # How accepting works (for beginners)
//!
//! `bind` starts one background task that accepts TCP sockets.  Every socket
//! gets its own handshake task, so a slow or malicious peer can never hold up
//! the others.  Finished handshakes (successful or not) are queued in a
//! bounded backlog, and `accept()` takes them out one at a time:
//!
//! ```text
//! TcpListener ──► accept task ──► handshake task ─┐
//!                             ──► handshake task ─┼─► backlog ──► accept()
//!                             ──► handshake task ─┘
//! ```
//!
//! `shutdown()` cancels all of it.  A pending `accept()` returns `Cancelled`,
//! later calls return `Closed`, and connections that finished their
//! handshake but were never accepted are aborted.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use braid_core::{ErrorCode, Side};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::registry::ConnectionRegistry;
use crate::domain::config::{ConnectorOptions, ListenerOptions, TransportConfig};
use crate::domain::error::{BindError, TransportError};
use crate::infrastructure::channel::{ClientHandshake, SecureChannelProvider, ServerHandshake};
use crate::infrastructure::connection::{establish, Connection};

/// Pause after a failed `accept(2)` so a persistent error (e.g. too many open
/// files) does not spin the accept task.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

type Incoming = Result<Connection, TransportError>;

/// Accepts inbound connections on a bound local endpoint.
pub struct Listener {
    local_addr: SocketAddr,
    backlog: Mutex<mpsc::Receiver<Incoming>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    registry: Arc<ConnectionRegistry>,
    default_close_code: ErrorCode,
}

impl Listener {
    /// Binds `options.local_addr` and starts accepting in the background.
    ///
    /// # Errors
    ///
    /// - [`BindError::Unsupported`] if `provider.is_supported()` is `false`.
    /// - [`BindError::Config`] if the transport config is invalid.
    /// - [`BindError::Io`] if the endpoint cannot be reserved.
    pub async fn bind(
        options: ListenerOptions,
        provider: Arc<dyn SecureChannelProvider>,
    ) -> Result<Listener, TransportError> {
        if !provider.is_supported() {
            return Err(BindError::Unsupported.into());
        }
        options.transport.validate().map_err(BindError::from)?;

        let addr = options.local_addr;
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|source| BindError::Io { addr, source })?;
        let local_addr = tcp
            .local_addr()
            .map_err(|source| BindError::Io { addr, source })?;

        let (tx, rx) = mpsc::channel(options.backlog.max(1));
        let cancel = CancellationToken::new();
        let default_close_code = options.transport.default_close_error_code;

        let handshake = Arc::new(ServerHandshake {
            application_protocols: options.application_protocols,
        });
        tokio::spawn(run_accept_loop(
            tcp,
            provider,
            handshake,
            options.transport,
            tx,
            cancel.clone(),
        ));

        debug!(%local_addr, "listener bound");
        Ok(Listener {
            local_addr,
            backlog: Mutex::new(rx),
            closed: AtomicBool::new(false),
            cancel,
            registry: Arc::new(ConnectionRegistry::new()),
            default_close_code,
        })
    }

    /// The bound endpoint, with an ephemeral port already resolved.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections accepted by this listener that have not closed yet.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Waits for the next inbound connection.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Handshake`] if that peer's handshake failed.  The
    ///   listener keeps running; call `accept()` again for the next peer.
    /// - [`TransportError::Cancelled`] if [`shutdown`](Self::shutdown) runs
    ///   while this call is waiting.
    /// - [`TransportError::Closed`] if the listener was already shut down.
    pub async fn accept(&self) -> Result<Connection, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut backlog = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
            guard = self.backlog.lock() => guard,
        };
        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            next = backlog.recv() => next,
        };

        match next {
            Some(Ok(conn)) => {
                self.registry.register(&conn);
                Ok(conn)
            }
            Some(Err(e)) => Err(e),
            None => {
                self.abort_backlog(&mut backlog);
                Err(TransportError::Cancelled)
            }
        }
    }

    /// Stops accepting.  Idempotent.
    ///
    /// Unblocks a pending [`accept`](Self::accept) with `Cancelled`.
    /// Connections already returned by `accept` are left alone; use
    /// [`ConnectionRegistry::close_all`] to close them too.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        // A pending `accept` holding the lock drains the backlog itself once
        // it sees the cancellation.
        if let Ok(mut backlog) = self.backlog.try_lock() {
            self.abort_backlog(&mut backlog);
        }
        debug!(local_addr = %self.local_addr, "listener shut down");
    }

    /// Aborts connections that finished their handshake but were never
    /// accepted.
    fn abort_backlog(&self, backlog: &mut mpsc::Receiver<Incoming>) {
        backlog.close();
        while let Ok(item) = backlog.try_recv() {
            if let Ok(conn) = item {
                conn.abort(self.default_close_code);
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_accept_loop(
    tcp: TcpListener,
    provider: Arc<dyn SecureChannelProvider>,
    handshake: Arc<ServerHandshake>,
    transport: TransportConfig,
    backlog: mpsc::Sender<Incoming>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = tcp.accept() => accepted,
        };

        match accepted {
            Ok((socket, peer)) => {
                debug!(%peer, "inbound socket");
                tokio::spawn(run_handshake(
                    socket,
                    Arc::clone(&provider),
                    Arc::clone(&handshake),
                    transport.clone(),
                    backlog.clone(),
                    cancel.clone(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

async fn run_handshake(
    socket: TcpStream,
    provider: Arc<dyn SecureChannelProvider>,
    handshake: Arc<ServerHandshake>,
    transport: TransportConfig,
    backlog: mpsc::Sender<Incoming>,
    cancel: CancellationToken,
) {
    let default_close_code = transport.default_close_error_code;
    let attempt = async {
        let channel = provider.handshake_as_server(socket, &handshake).await?;
        let conn = establish(channel, Side::Server, transport).await?;
        Ok::<Connection, TransportError>(conn)
    };

    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        result = attempt => result,
    };

    if let Err(e) = &result {
        debug!(error = %e, "inbound handshake failed");
    }

    let permit = tokio::select! {
        _ = cancel.cancelled() => None,
        permit = backlog.reserve() => permit.ok(),
    };
    match permit {
        Some(permit) => permit.send(result),
        None => {
            if let Ok(conn) = result {
                conn.abort(default_close_code);
            }
        }
    }
}

// ── Client side ───────────────────────────────────────────────────────────────

/// Dials outbound connections.
pub struct Connector {
    provider: Arc<dyn SecureChannelProvider>,
    options: ConnectorOptions,
    registry: Arc<ConnectionRegistry>,
}

impl Connector {
    pub fn new(options: ConnectorOptions, provider: Arc<dyn SecureChannelProvider>) -> Self {
        Self {
            provider,
            options,
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Connections opened by this connector that have not closed yet.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Connects to `remote`, runs the handshake and preface, and registers
    /// the resulting connection.
    ///
    /// # Errors
    ///
    /// - [`BindError::Unsupported`] / [`BindError::Config`] before dialing.
    /// - [`TransportError::Handshake`] if the handshake or preface fails.
    pub async fn connect(&self, remote: SocketAddr) -> Result<Connection, TransportError> {
        if !self.provider.is_supported() {
            return Err(BindError::Unsupported.into());
        }
        self.options.transport.validate().map_err(BindError::from)?;

        let handshake = ClientHandshake {
            application_protocols: self.options.application_protocols.clone(),
            server_name: self.options.server_name.clone(),
        };
        let channel = self.provider.handshake_as_client(remote, &handshake).await?;
        let conn = establish(channel, Side::Client, self.options.transport.clone()).await?;

        self.registry.register(&conn);
        Ok(conn)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::HandshakeError;
    use crate::infrastructure::channel::MockSecureChannelProvider;

    fn loopback_options() -> ListenerOptions {
        ListenerOptions {
            application_protocols: vec!["test".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bind_fails_distinctly_when_provider_is_unsupported() {
        // Arrange
        let mut provider = MockSecureChannelProvider::new();
        provider.expect_is_supported().return_const(false);

        // Act
        let result = Listener::bind(loopback_options(), Arc::new(provider)).await;

        // Assert
        assert!(matches!(
            result,
            Err(TransportError::Bind(BindError::Unsupported))
        ));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_transport_config() {
        let mut provider = MockSecureChannelProvider::new();
        provider.expect_is_supported().return_const(true);
        let mut options = loopback_options();
        options.transport.stream_window = 0;

        let result = Listener::bind(options, Arc::new(provider)).await;

        assert!(matches!(
            result,
            Err(TransportError::Bind(BindError::Config(_)))
        ));
    }

    #[tokio::test]
    async fn test_bind_to_taken_port_is_an_io_bind_error() {
        // Arrange – hold a port so the listener cannot take it
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut provider = MockSecureChannelProvider::new();
        provider.expect_is_supported().return_const(true);
        let options = ListenerOptions {
            local_addr: taken.local_addr().unwrap(),
            ..loopback_options()
        };

        // Act
        let result = Listener::bind(options, Arc::new(provider)).await;

        // Assert
        assert!(matches!(
            result,
            Err(TransportError::Bind(BindError::Io { .. }))
        ));
    }

    #[tokio::test]
    async fn test_failed_inbound_handshake_surfaces_from_accept() {
        // Arrange
        let mut provider = MockSecureChannelProvider::new();
        provider.expect_is_supported().return_const(true);
        provider
            .expect_handshake_as_server()
            .returning(|_, _| Err(HandshakeError::Rejected("bad certificate".to_string())));
        let listener = Listener::bind(loopback_options(), Arc::new(provider))
            .await
            .unwrap();

        // Act – a raw TCP client triggers one handshake
        let _socket = TcpStream::connect(listener.local_addr()).await.unwrap();
        let result = listener.accept().await;

        // Assert
        assert!(matches!(
            result,
            Err(TransportError::Handshake(HandshakeError::Rejected(_)))
        ));
        assert!(listener.registry().is_empty());
    }

    #[tokio::test]
    async fn test_connector_reports_unsupported_provider() {
        let mut provider = MockSecureChannelProvider::new();
        provider.expect_is_supported().return_const(false);
        let connector = Connector::new(ConnectorOptions::default(), Arc::new(provider));

        let result = connector.connect("127.0.0.1:9".parse().unwrap()).await;

        assert!(matches!(
            result,
            Err(TransportError::Bind(BindError::Unsupported))
        ));
    }

    #[tokio::test]
    async fn test_connector_propagates_client_handshake_error() {
        let mut provider = MockSecureChannelProvider::new();
        provider.expect_is_supported().return_const(true);
        provider
            .expect_handshake_as_client()
            .returning(|_, _| Err(HandshakeError::NoCommonProtocol));
        let connector = Connector::new(ConnectorOptions::default(), Arc::new(provider));

        let result = connector.connect("127.0.0.1:9".parse().unwrap()).await;

        assert!(matches!(
            result,
            Err(TransportError::Handshake(HandshakeError::NoCommonProtocol))
        ));
        assert!(connector.registry().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_harmless_and_accept_reports_closed() {
        let mut provider = MockSecureChannelProvider::new();
        provider.expect_is_supported().return_const(true);
        let listener = Listener::bind(loopback_options(), Arc::new(provider))
            .await
            .unwrap();

        listener.shutdown();
        listener.shutdown();

        assert!(matches!(
            listener.accept().await,
            Err(TransportError::Closed)
        ));
    }
}
