//! Outbound Connection
//!
//! The feeder's single persistent link to the broadcast server.
//!
//! ## Architecture
//!
//! - **ConnectionManager**: connect, send, background reconnect, disconnect
//! - **ConnectionState**: `Disconnected → Connecting → Connected → Error`
//! - **RetryPolicy**: attempt limit, delay and backoff for (re)connects
//!
//! Delivery is at-most-once with per-connection ordering. Records produced
//! while the link is down are dropped.

mod manager;
mod retry;
mod state;

pub use manager::{ConnectionManager, ConnectionStats, LinkConfig};
pub use retry::RetryPolicy;
pub use state::ConnectionState;

use thiserror::Error;

/// Errors raised by the connection manager
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No usable link; the record was dropped
    #[error("Not connected (state: {0})")]
    NotConnected(ConnectionState),

    /// Every connect attempt failed
    #[error("Gave up after {attempts} connection attempts")]
    RetriesExhausted { attempts: u32 },

    /// Writing to the link failed; a reconnect has been started
    #[error("Send failed: {0}")]
    Send(String),

    /// The server closed the link; a reconnect has been started
    #[error("Connection closed by server")]
    Closed,

    /// The record could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectionError::NotConnected(ConnectionState::Connecting);
        assert_eq!(err.to_string(), "Not connected (state: connecting)");

        let err = ConnectionError::RetriesExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "Gave up after 5 connection attempts");
    }
}
