//! Error taxonomy for adapter calls and investigation control flow

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the boundary adapters (cluster, analyzer, LLM).
///
/// The investigator translates these into step failures or findings; the
/// scheduler never propagates them to API clients.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter call timed out after {0:?}")]
    Timeout(Duration),

    #[error("adapter unavailable: {0}")]
    Unavailable(String),

    #[error("external tool missing: {0}")]
    ToolMissing(String),

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("call cancelled")]
    Cancelled,
}

impl AdapterError {
    /// Short stable identifier used in step errors and log event details
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::Timeout(_) => "adapter_timeout",
            AdapterError::Unavailable(_) => "adapter_unavailable",
            AdapterError::ToolMissing(_) => "tool_missing",
            AdapterError::RateLimited => "rate_limited",
            AdapterError::Malformed(_) => "malformed",
            AdapterError::Cancelled => "cancelled",
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;
