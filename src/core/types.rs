use std::fmt::Debug;
use std::time::Duration;

use http::HeaderMap;
use thiserror::Error;

/// Convenience result alias for websocket operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;

/// Close code used for normal closure (RFC 6455).
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Close code reported when a close frame carried no status (RFC 6455).
pub const NO_STATUS_CLOSE_CODE: u16 = 1005;

/// Close code reported when the peer vanished without a close frame (RFC 6455).
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Canonical websocket error surface shared across the crate.
///
/// `Closed`, `ConnectionFailed`, `Initialization` and `CreationFailed` are the terminal reasons a
/// connection can close with; the remaining variants describe failures of individual operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebSocketError {
    /// Explicit or peer-initiated close.
    #[error("{reason} ({code})")]
    Closed { code: u16, reason: String },

    /// Transport or IO failure, including read timeouts and failed sends.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Initialization timed out or was canceled.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The transport could not be established at all.
    #[error("Creation failed: {0}")]
    CreationFailed(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Timeout: {context}")]
    Timeout { context: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WebSocketError {
    pub fn closed(code: u16, reason: impl Into<String>) -> Self {
        WebSocketError::Closed {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal_close(reason: impl Into<String>) -> Self {
        Self::closed(NORMAL_CLOSE_CODE, reason)
    }

    /// Close code to put on the wire when a connection terminates with this reason.
    pub fn close_code(&self) -> u16 {
        match self {
            WebSocketError::Closed { code, .. } => *code,
            WebSocketError::Initialization(_) => 1008,
            WebSocketError::ConnectionFailed(_) | WebSocketError::TransportError { .. } => 1011,
            _ => NORMAL_CLOSE_CODE,
        }
    }
}

/// Transport-independent buffer sizing parameters used for websocket configuration.
#[derive(Clone, Copy, Debug)]
pub struct WebSocketBufferConfig {
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for WebSocketBufferConfig {
    fn default() -> Self {
        Self {
            write_buffer_bytes: 128 << 10,
            max_write_buffer_bytes: 256 << 10,
            max_message_bytes: 16 * 1024 * 1024,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

/// TLS configuration for websocket connections.
///
/// Safe-by-default: certificate validation is enabled unless explicitly disabled for development /
/// controlled environments.
#[derive(Clone, Copy, Debug)]
pub struct WsTlsConfig {
    pub validate_certs: bool,
}

impl Default for WsTlsConfig {
    fn default() -> Self {
        Self {
            validate_certs: true,
        }
    }
}

/// Where a client connection goes and which headers accompany the upgrade request.
#[derive(Clone, Debug)]
pub struct ConnectTarget {
    pub url: String,
    pub headers: HeaderMap,
}

impl ConnectTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Everything a transport needs to open one physical connection.
#[derive(Clone, Debug)]
pub struct ConnectRequest {
    pub target: ConnectTarget,
    pub buffers: WebSocketBufferConfig,
    pub tls: WsTlsConfig,
    pub timeout: Duration,
}
