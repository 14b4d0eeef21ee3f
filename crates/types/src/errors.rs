//! Error taxonomy for the pipeline
//!
//! Every failure crossing a component boundary is classified here so that
//! retry decisions never depend on string matching: transient remote
//! outcomes are retry-eligible, terminal ones abort immediately, timeouts
//! surface as their own user-visible outcome.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed URL or body, rejected synchronously at the boundary
    #[error("validation error: {0}")]
    Validation(String),

    /// Remote call failed with a retry-eligible status (4xx/5xx class)
    #[error("remote call failed with retryable status {status}")]
    TransientRemote { status: u16 },

    /// Remote call failed outside the retryable class; no further attempts
    #[error("remote call failed with non-retryable status {status}")]
    TerminalRemote { status: u16 },

    /// No reply arrived within the query deadline
    #[error("timed out after {waited_ms}ms waiting for a reply")]
    Timeout { waited_ms: u64 },

    /// Pool or queue at capacity; callers block, bounded by capacity
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker error: {0}")]
    Broker(String),

    /// Durable store operation failed; treated as retry-eligible
    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Classify an HTTP-style status code into the taxonomy.
    ///
    /// Codes in 400..600 are the transient class of the dispatch path;
    /// anything else outside 2xx terminates a retry sequence immediately.
    pub fn from_status(status: u16) -> Self {
        if (400..600).contains(&status) {
            Self::TransientRemote { status }
        } else {
            Self::TerminalRemote { status }
        }
    }

    /// Whether a retry sequence may attempt again after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientRemote { .. } | Self::Storage(_) | Self::Broker(_)
        )
    }

    /// Status code carried by remote outcomes, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TransientRemote { status } | Self::TerminalRemote { status } => Some(*status),
            _ => None,
        }
    }
}
