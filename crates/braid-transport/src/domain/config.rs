//! Transport configuration and the options accepted by `bind` / `connect`.
//!
//! [`TransportConfig`] holds the per-connection tuning knobs.  Every field has
//! a default, so a TOML file only needs to mention what it changes:
//!
//! ```toml
//! stream_window = 65536
//! max_inbound_bidi_streams = 16
//! ```
//!
//! Fields missing from the file fall back to the values in
//! [`TransportConfig::default`], which makes older config files keep working
//! when new fields are added.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use braid_core::protocol::frame::MAX_PAYLOAD_SIZE;
use braid_core::{ErrorCode, Settings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parsed but make no sense together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-connection tuning shared by both ends of the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bytes buffered per stream direction before the peer must wait.
    pub stream_window: u32,
    /// Largest `Stream` frame payload this side sends or accepts.
    pub max_frame_payload: u32,
    /// Concurrently live bidirectional streams the peer may open.
    pub max_inbound_bidi_streams: u64,
    /// Concurrently live unidirectional streams the peer may open.
    pub max_inbound_uni_streams: u64,
    /// Code used when a stream handle is dropped before the stream closed.
    pub default_stream_error_code: ErrorCode,
    /// Code used when a connection is torn down without an explicit code.
    pub default_close_error_code: ErrorCode,
    /// Capacity of the outbound data queue, in frames.
    pub outbound_queue_frames: usize,
}

impl Default for TransportConfig {
    /// | Field                      | Default   |
    /// |----------------------------|-----------|
    /// | stream_window              | 256 KiB   |
    /// | max_frame_payload          | 16 KiB    |
    /// | max_inbound_bidi_streams   | 100       |
    /// | max_inbound_uni_streams    | 10        |
    /// | default_stream_error_code  | `0x0A`    |
    /// | default_close_error_code   | `0x0B`    |
    /// | outbound_queue_frames      | 64        |
    fn default() -> Self {
        Self {
            stream_window: 256 * 1024,
            max_frame_payload: 16 * 1024,
            max_inbound_bidi_streams: 100,
            max_inbound_uni_streams: 10,
            default_stream_error_code: ErrorCode(0x0A),
            default_close_error_code: ErrorCode(0x0B),
            outbound_queue_frames: 64,
        }
    }
}

impl TransportConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] if [`validate`](Self::validate) fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: TransportConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values the transport cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_window == 0 {
            return Err(ConfigError::Invalid(
                "stream_window must be greater than zero".to_string(),
            ));
        }
        if self.max_frame_payload == 0 || self.max_frame_payload as usize > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_frame_payload must be between 1 and {MAX_PAYLOAD_SIZE}"
            )));
        }
        if self.outbound_queue_frames == 0 {
            return Err(ConfigError::Invalid(
                "outbound_queue_frames must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The `Settings` preface this config advertises to the peer.
    pub fn local_settings(&self) -> Settings {
        Settings {
            initial_stream_window: self.stream_window,
            max_frame_payload: self.max_frame_payload,
            max_inbound_bidi_streams: self.max_inbound_bidi_streams,
            max_inbound_uni_streams: self.max_inbound_uni_streams,
        }
    }
}

/// Loads a [`TransportConfig`] from a TOML file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
/// errors of [`TransportConfig::from_toml_str`].
pub fn load_config(path: &Path) -> Result<TransportConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    TransportConfig::from_toml_str(&content)
}

/// Everything `Listener::bind` needs besides the channel provider.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Endpoint to bind.  Port 0 picks an ephemeral port; read the result
    /// back with `Listener::local_addr`.
    pub local_addr: SocketAddr,
    /// Application protocols offered, in preference order.
    pub application_protocols: Vec<String>,
    /// Handshaken connections that may wait for `accept()`.
    pub backlog: usize,
    pub transport: TransportConfig,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            local_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            application_protocols: Vec::new(),
            backlog: 16,
            transport: TransportConfig::default(),
        }
    }
}

/// Everything `Connector::connect` needs besides the channel provider.
#[derive(Debug, Clone, Default)]
pub struct ConnectorOptions {
    /// Application protocols acceptable to the client, in preference order.
    pub application_protocols: Vec<String>,
    /// Name the server is expected to present, if the provider checks one.
    pub server_name: Option<String>,
    pub transport: TransportConfig,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
