//! The secure-channel boundary.
//!
//! Braid does not implement TLS or any other cryptographic handshake itself.
//! Instead a [`SecureChannelProvider`] turns a raw TCP connection into an
//! authenticated duplex byte pipe and reports which application protocol the
//! two sides agreed on.  Everything Braid does afterwards (frames, streams,
//! flow control) travels *inside* that pipe.
//!
//! Production deployments plug in a TLS-backed provider.  For loopback tests
//! and trusted networks, [`plain::PlainChannelProvider`] negotiates the
//! application protocol over plain TCP.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::domain::error::HandshakeError;

pub mod plain;

/// Any duplex byte pipe the transport can run over.
pub trait ChannelIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ChannelIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// An established secure channel, ready for the multiplexing preface.
pub struct SecureChannel {
    pub io: Box<dyn ChannelIo>,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    /// The application protocol both sides agreed on.
    pub application_protocol: String,
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("application_protocol", &self.application_protocol)
            .finish_non_exhaustive()
    }
}

/// Server-side handshake parameters.
#[derive(Debug, Clone, Default)]
pub struct ServerHandshake {
    /// Protocols the server accepts, most preferred first.
    pub application_protocols: Vec<String>,
}

/// Client-side handshake parameters.
#[derive(Debug, Clone, Default)]
pub struct ClientHandshake {
    /// Protocols the client can speak, most preferred first.
    pub application_protocols: Vec<String>,
    pub server_name: Option<String>,
}

/// Performs the secure handshake for both roles.
///
/// Implementations must not retry on failure: the error goes back to the
/// caller of `accept` or `connect` as a `HandshakeError`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecureChannelProvider: Send + Sync {
    /// Returns `false` if this provider cannot run on the current platform.
    fn is_supported(&self) -> bool;

    /// Runs the server side of the handshake over an accepted socket.
    async fn handshake_as_server(
        &self,
        stream: TcpStream,
        config: &ServerHandshake,
    ) -> Result<SecureChannel, HandshakeError>;

    /// Connects to `remote` and runs the client side of the handshake.
    async fn handshake_as_client(
        &self,
        remote: SocketAddr,
        config: &ClientHandshake,
    ) -> Result<SecureChannel, HandshakeError>;
}
