//! # braid-transport
//!
//! Async transport that carries many independent byte streams over one
//! secure connection.
//!
//! # Architecture overview (for beginners)
//!
//! ```text
//!   application code
//!         │ open_stream / accept_stream / read / write / close
//!         ▼
//!   ┌─────────────┐   register   ┌────────────────────┐
//!   │ Connection  │─────────────►│ ConnectionRegistry │  (application)
//!   │  └ Stream…  │              └────────────────────┘
//!   └──────┬──────┘
//!          │ frames (braid-core codec)
//!   ┌──────▼──────────────┐
//!   │ reader / writer task│                              (infrastructure)
//!   └──────┬──────────────┘
//!          │ bytes
//!   ┌──────▼──────────────┐
//!   │ SecureChannel       │ ◄── SecureChannelProvider (handshake, ALPN)
//!   └─────────────────────┘
//! ```
//!
//! - **`domain`** – Configuration and the error vocabulary.  No I/O.
//! - **`application`** – [`ConnectionRegistry`] for coordinated shutdown.
//! - **`infrastructure`** – [`Listener`], [`Connector`], [`Connection`],
//!   [`Stream`], and the [`SecureChannelProvider`] boundary with its
//!   [`PlainChannelProvider`] implementation.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use braid_transport::{Connector, ConnectorOptions, Listener, ListenerOptions, PlainChannelProvider};
//! use braid_core::{Direction, ErrorCode};
//!
//! # async fn demo() -> Result<(), braid_transport::TransportError> {
//! let provider = Arc::new(PlainChannelProvider::new());
//! let listener = Listener::bind(
//!     ListenerOptions {
//!         application_protocols: vec!["echo".into()],
//!         ..Default::default()
//!     },
//!     provider.clone(),
//! )
//! .await?;
//!
//! let connector = Connector::new(
//!     ConnectorOptions {
//!         application_protocols: vec!["echo".into()],
//!         ..Default::default()
//!     },
//!     provider,
//! );
//! let conn = connector.connect(listener.local_addr()).await?;
//! let stream = conn.open_stream(Direction::Bidirectional)?;
//! stream.write_all(b"hello").await?;
//! stream.finish().await?;
//! conn.close(ErrorCode::NO_ERROR).await;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::ConnectionRegistry;
pub use domain::{
    load_config, BindError, ConfigError, ConnectorOptions, HandshakeError, ListenerOptions,
    TransportConfig, TransportError,
};
pub use infrastructure::channel::plain::PlainChannelProvider;
pub use infrastructure::channel::{
    ChannelIo, ClientHandshake, SecureChannel, SecureChannelProvider, ServerHandshake,
};
pub use infrastructure::connection::{Connection, WeakConnection};
pub use infrastructure::listener::{Connector, Listener};
pub use infrastructure::stream::Stream;
