//! `PlainChannelProvider`: application-protocol negotiation over plain TCP.
//!
//! This provider performs **no cryptography**.  It exists so the transport can
//! be exercised on loopback and inside trusted networks without certificates.
//!
//! # Wire format
//!
//! Each hello message is a big-endian `u32` length followed by that many
//! bytes of bincode:
//!
//! ```text
//! client → server   [len:4][ClientHello]
//! server → client   [len:4][ServerHello]
//! ```
//!
//! The server walks its own protocol list in order and picks the first entry
//! the client also offered, so the server's preference wins.

use std::net::SocketAddr;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::domain::error::HandshakeError;
use crate::infrastructure::channel::{
    ClientHandshake, SecureChannel, SecureChannelProvider, ServerHandshake,
};

/// Version byte carried in [`ClientHello`].
const HELLO_VERSION: u8 = 1;

/// Hello messages larger than this are rejected before allocating.
const MAX_HELLO_SIZE: u32 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ClientHello {
    version: u8,
    application_protocols: Vec<String>,
    server_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum ServerHello {
    Accepted { application_protocol: String },
    NoCommonProtocol,
    Rejected { reason: String },
}

/// Unencrypted [`SecureChannelProvider`] for loopback and trusted networks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainChannelProvider;

impl PlainChannelProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SecureChannelProvider for PlainChannelProvider {
    fn is_supported(&self) -> bool {
        true
    }

    async fn handshake_as_server(
        &self,
        mut stream: TcpStream,
        config: &ServerHandshake,
    ) -> Result<SecureChannel, HandshakeError> {
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let application_protocol = negotiate_as_server(&mut stream, config).await?;
        debug!(%remote_addr, protocol = %application_protocol, "plain handshake accepted");

        Ok(SecureChannel {
            io: Box::new(stream),
            local_addr,
            remote_addr,
            application_protocol,
        })
    }

    async fn handshake_as_client(
        &self,
        remote: SocketAddr,
        config: &ClientHandshake,
    ) -> Result<SecureChannel, HandshakeError> {
        let mut stream = TcpStream::connect(remote).await?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(true)?;

        let application_protocol = negotiate_as_client(&mut stream, config).await?;
        debug!(remote_addr = %remote, protocol = %application_protocol, "plain handshake complete");

        Ok(SecureChannel {
            io: Box::new(stream),
            local_addr,
            remote_addr: remote,
            application_protocol,
        })
    }
}

// ── Negotiation ───────────────────────────────────────────────────────────────

/// Picks the first server-preferred protocol the client also offered.
///
/// Two empty lists agree on the empty protocol; one empty list agrees on
/// nothing.
fn select_protocol(server: &[String], client: &[String]) -> Option<String> {
    if server.is_empty() && client.is_empty() {
        return Some(String::new());
    }
    server.iter().find(|p| client.contains(p)).cloned()
}

async fn negotiate_as_server<S>(io: &mut S, config: &ServerHandshake) -> Result<String, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello: ClientHello = read_message(io).await?;

    if hello.version != HELLO_VERSION {
        let reason = format!("unsupported hello version {}", hello.version);
        write_message(io, &ServerHello::Rejected { reason: reason.clone() }).await?;
        return Err(HandshakeError::Rejected(reason));
    }

    match select_protocol(&config.application_protocols, &hello.application_protocols) {
        Some(application_protocol) => {
            write_message(
                io,
                &ServerHello::Accepted {
                    application_protocol: application_protocol.clone(),
                },
            )
            .await?;
            Ok(application_protocol)
        }
        None => {
            write_message(io, &ServerHello::NoCommonProtocol).await?;
            Err(HandshakeError::NoCommonProtocol)
        }
    }
}

async fn negotiate_as_client<S>(io: &mut S, config: &ClientHandshake) -> Result<String, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = ClientHello {
        version: HELLO_VERSION,
        application_protocols: config.application_protocols.clone(),
        server_name: config.server_name.clone(),
    };
    write_message(io, &hello).await?;

    match read_message(io).await? {
        ServerHello::Accepted {
            application_protocol,
        } => {
            let offered = config.application_protocols.contains(&application_protocol)
                || (config.application_protocols.is_empty() && application_protocol.is_empty());
            if !offered {
                return Err(HandshakeError::Malformed(format!(
                    "server selected protocol {application_protocol:?} that was never offered"
                )));
            }
            Ok(application_protocol)
        }
        ServerHello::NoCommonProtocol => Err(HandshakeError::NoCommonProtocol),
        ServerHello::Rejected { reason } => Err(HandshakeError::Rejected(reason)),
    }
}

// ── Length-prefixed bincode ───────────────────────────────────────────────────

async fn write_message<S, T>(io: &mut S, message: &T) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(message).map_err(|e| HandshakeError::Malformed(e.to_string()))?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_HELLO_SIZE)
        .ok_or_else(|| HandshakeError::Malformed("hello message too large".to_string()))?;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(&body).await?;
    io.flush().await?;
    Ok(())
}

async fn read_message<S, T>(io: &mut S) -> Result<T, HandshakeError>
where
    S: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = io.read_u32().await?;
    if len > MAX_HELLO_SIZE {
        return Err(HandshakeError::Malformed(format!(
            "hello message of {len} bytes exceeds {MAX_HELLO_SIZE}"
        )));
    }
    let mut body = vec![0u8; len as usize];
    io.read_exact(&mut body).await?;
    bincode::deserialize(&body).map_err(|e| HandshakeError::Malformed(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
