//! braid-echo entry point.
//!
//! ```text
//! braid-echo serve --listen 127.0.0.1:4433
//!  └─ Listener::bind()
//!  └─ accept loop ──► serve_connection() per connection
//!                        └─ echo_stream() per stream
//!  └─ Ctrl-C ──► listener.shutdown() + registry.close_all()
//!
//! braid-echo send --connect 127.0.0.1:4433 "hello"
//!  └─ Connector::connect() ──► round_trip() ──► close()
//! ```
//!
//! Logging is controlled by `RUST_LOG` (default `info`), e.g.
//! `RUST_LOG=braid_transport=debug braid-echo serve`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use braid_core::ErrorCode;
use braid_echo::handler::{round_trip, serve_connection};
use braid_transport::{
    load_config, Connector, ConnectorOptions, Listener, ListenerOptions, PlainChannelProvider,
    TransportConfig, TransportError,
};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application protocol spoken by both subcommands unless overridden.
const DEFAULT_ALPN: &str = "braid-echo";

#[derive(Debug, Parser)]
#[command(name = "braid-echo", version, about = "Echo server and client for the Braid transport")]
struct Cli {
    /// Transport tuning file (TOML).  Missing fields keep their defaults.
    #[arg(long, global = true, env = "BRAID_CONFIG")]
    config: Option<PathBuf>,

    /// Application protocol to negotiate.
    #[arg(long, global = true, default_value = DEFAULT_ALPN, env = "BRAID_ALPN")]
    alpn: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept connections and echo every stream.
    Serve {
        #[arg(long, default_value = "127.0.0.1:4433", env = "BRAID_LISTEN")]
        listen: SocketAddr,

        /// Handshaken connections allowed to wait for accept.
        #[arg(long, default_value_t = 16)]
        backlog: usize,
    },
    /// Send one message and print the echo.
    Send {
        #[arg(long, default_value = "127.0.0.1:4433", env = "BRAID_CONNECT")]
        connect: SocketAddr,

        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let transport = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("loading transport config from {}", path.display()))?,
        None => TransportConfig::default(),
    };

    match cli.command {
        Command::Serve { listen, backlog } => serve(listen, backlog, cli.alpn, transport).await,
        Command::Send { connect, message } => send(connect, &message, cli.alpn, transport).await,
    }
}

async fn serve(
    listen: SocketAddr,
    backlog: usize,
    alpn: String,
    transport: TransportConfig,
) -> anyhow::Result<()> {
    let close_code = transport.default_close_error_code;
    let listener = Listener::bind(
        ListenerOptions {
            local_addr: listen,
            application_protocols: vec![alpn],
            backlog,
            transport,
        },
        Arc::new(PlainChannelProvider::new()),
    )
    .await
    .with_context(|| format!("binding {listen}"))?;
    let listener = Arc::new(listener);

    info!(local_addr = %listener.local_addr(), "braid-echo listening (plain channel, no encryption)");

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let signal_listener = Arc::clone(&listener);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_listener.shutdown();
        }
    });

    // ── Accept loop ───────────────────────────────────────────────────────────
    loop {
        match listener.accept().await {
            Ok(conn) => {
                tokio::spawn(serve_connection(conn));
            }
            Err(TransportError::Handshake(e)) => warn!("handshake failed: {e}"),
            Err(TransportError::Cancelled | TransportError::Closed) => break,
            Err(e) => return Err(e).context("accepting connections"),
        }
    }

    let open = listener.registry().len();
    info!(open, "closing remaining connections");
    listener.registry().close_all(close_code).await;
    info!("braid-echo stopped");
    Ok(())
}

async fn send(
    connect: SocketAddr,
    message: &str,
    alpn: String,
    transport: TransportConfig,
) -> anyhow::Result<()> {
    let limit = message.len().max(1);
    let connector = Connector::new(
        ConnectorOptions {
            application_protocols: vec![alpn],
            server_name: None,
            transport,
        },
        Arc::new(PlainChannelProvider::new()),
    );

    let conn = connector
        .connect(connect)
        .await
        .with_context(|| format!("connecting to {connect}"))?;
    let echoed = round_trip(&conn, message.as_bytes(), limit)
        .await
        .context("echo round trip")?;
    conn.close(ErrorCode::NO_ERROR).await;

    println!("{}", String::from_utf8_lossy(&echoed));
    Ok(())
}
