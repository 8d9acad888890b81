//! Streaming client error types

use thiserror::Error;

/// Error starting or consuming a computation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Transport could not be opened
    #[error("connection error: {0}")]
    Connection(String),

    /// Program rejected before streaming started
    #[error("invalid program: {0}")]
    InvalidProgram(String),

    /// Undecodable message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error reported by the computation itself
    #[error("upstream error: {0}")]
    Upstream(String),
}
