//! Error types for the book-sync crate.
//!
//! Nothing in this crate is fatal: every error either drops a single frame or
//! level, or hands control back to the reconnect loop. The book is left in its
//! last known good state.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::client::session::SessionState;
use crate::types::Side;

/// The main error type for this crate
#[derive(Debug, Error)]
pub enum Error {
    /// Frame is not valid JSON, lacks both `event` and `feed`, or carries a
    /// level that is not a `[price, size]` pair of numbers
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A price level violates numeric constraints and was dropped
    #[error("invalid {side} level {price} x {size}: {reason}")]
    InvalidLevel {
        /// Side the level was destined for
        side: Side,
        /// Offending price
        price: Decimal,
        /// Offending size
        size: Decimal,
        /// Which constraint was violated
        reason: &'static str,
    },

    /// Send attempted while the session is not open
    #[error("session is not connected")]
    NotConnected,

    /// Connection dropped by the remote or the network
    #[error("connection lost")]
    ConnectionLost,

    /// Session or feed has shut down and no longer accepts commands
    #[error("closed")]
    Closed,

    /// Operation not allowed in the session's current state
    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition {
        /// State the session was in
        from: SessionState,
        /// State the operation would have moved to
        to: SessionState,
    },

    /// WebSocket protocol or transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration (bad url, empty instrument list)
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error means the transport is gone and a reconnect is due
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::ConnectionLost | Error::WebSocket(_))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("invalid url: {}", err))
    }
}
