//! Domain layer for braid-transport.
//!
//! Plain configuration structs and the error vocabulary shared by every other
//! layer.  Nothing in here touches a socket or spawns a task, so all of it can
//! be unit tested without a runtime.

pub mod config;
pub mod error;

pub use config::{load_config, ConfigError, ConnectorOptions, ListenerOptions, TransportConfig};
pub use error::{BindError, HandshakeError, TransportError};
