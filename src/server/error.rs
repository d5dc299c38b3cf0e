//! Server Error Types

use thiserror::Error;

/// Errors that stop the broadcast server
#[derive(Error, Debug)]
pub enum ServerError {
    /// Binding or accepting failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Internal(String),
}
