//! Error taxonomy for connector and sink failures.
//!
//! The executor branches on transient vs. terminal: transient errors are
//! retried with exponential backoff up to the schedule's `max_retries`,
//! terminal errors fail the run immediately and mark the source unhealthy.
//! Per-record problems never surface here; they are counted on the run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Timeout, rate limit, connection reset. Worth retrying.
    #[error("transient connector error: {0}")]
    Transient(String),

    /// Auth rejected, source not found. Retrying cannot help.
    #[error("terminal connector error: {0}")]
    Terminal(String),
}

impl ConnectorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Transient(_))
    }
}

/// Failure publishing to or deleting from the indexing sink.
/// Retried with the same policy as transient connector errors.
#[derive(Debug, Error)]
#[error("sink error: {0}")]
pub struct SinkError(pub String);
