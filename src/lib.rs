//! Resilient WebSocket market-data streams
//!
//! Core library: a pooled, self-healing connection manager, a subscription
//! tracker and a generic stream session, plus venue codecs for Bybit (topic
//! dialect) and Deribit (JSON-RPC dialect).

pub mod exchanges;
pub mod infrastructure;
pub mod stream;
pub mod ws;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use infrastructure::config::{Config, LoggingConfig, StreamOptions};
pub use stream::{
    CodecError, Credentials, DecodeFn, Dialect, SessionController, SessionState, StreamSession,
};
pub use ws::{
    ConnectionManager, ConnectionState, ErrorClassifier, ErrorMatcher, Message, Subscription,
    SubscriptionSet,
};

use std::time::Duration;
use thiserror::Error;

/// Coarse error category used by [`ErrorClassifier`] kind matchers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket read or write failure
    Io,
    /// Upgrade handshake rejected
    Handshake,
    /// Peer closed the connection (close frame or stream end)
    Closed,
    /// WebSocket protocol violation or malformed envelope
    Protocol,
    /// Venue returned an error response
    Server,
    /// Payload could not be decoded into the typed record
    Decode,
    /// Dial retry budget exhausted
    Dial,
    /// Root context cancelled
    Cancelled,
    /// API misuse (start twice)
    Usage,
    /// Invalid configuration
    Config,
}

/// Main error type for the streaming core
///
/// Display texts of the transport variants carry stable signatures
/// (`read tcp`, `write tcp`, `websocket: close sent`, `websocket: bad handshake`)
/// that the default reconnect classifier matches on.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("read tcp: {0}")]
    Read(String),

    #[error("write tcp: {0}")]
    Write(String),

    #[error("websocket: bad handshake: {0}")]
    Handshake(String),

    /// The socket is gone; writes after close end up here too.
    #[error("websocket: close sent")]
    ConnectionClosed,

    #[error("websocket: close {code}: {reason}")]
    Closed { code: u16, reason: String },

    #[error("websocket: protocol error: {0}")]
    Protocol(String),

    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("dial failed after {attempts} attempts")]
    DialExhausted {
        attempts: u32,
        #[source]
        source: Box<StreamError>,
    },

    /// In-place re-dial after a dropped connection ran out of attempts.
    /// Classified by its source, so a refused handshake stays reconnectable.
    #[error("failed to connect after retries: {source}")]
    ReconnectFailed {
        attempts: u32,
        #[source]
        source: Box<StreamError>,
    },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("decode failed: {0}")]
    Decode(#[from] CodecError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("already started")]
    AlreadyStarted,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<StreamError>,
    },
}

impl StreamError {
    /// Category of this error, looking through [`StreamError::Context`]
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Read(_) | StreamError::Write(_) | StreamError::Io(_) => ErrorKind::Io,
            StreamError::Handshake(_) => ErrorKind::Handshake,
            StreamError::ConnectionClosed | StreamError::Closed { .. } => ErrorKind::Closed,
            StreamError::Protocol(_) | StreamError::InvalidMessage(_) => ErrorKind::Protocol,
            StreamError::DialTimeout(_) | StreamError::DialExhausted { .. } => ErrorKind::Dial,
            StreamError::InvalidUrl(_) | StreamError::Config(_) => ErrorKind::Config,
            StreamError::Server(_) => ErrorKind::Server,
            StreamError::Decode(_) => ErrorKind::Decode,
            StreamError::Cancelled => ErrorKind::Cancelled,
            StreamError::AlreadyStarted => ErrorKind::Usage,
            StreamError::Context { source, .. } | StreamError::ReconnectFailed { source, .. } => {
                source.kind()
            }
        }
    }

    /// Wrap with a context prefix such as `"bybit TradesStream"`
    pub fn context(self, context: impl Into<String>) -> Self {
        StreamError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StreamError>;
