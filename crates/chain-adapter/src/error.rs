//! Adapter error taxonomy

use thiserror::Error;

/// Errors an adapter can surface to the engine.
///
/// `Unreachable` and `TimedOut` are retryable under the dispatcher's
/// backoff bound; `AlreadyProcessed` is the destination idempotency signal
/// the dispatcher converts into success; any other `Rejected` is terminal
/// for the relay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("chain unreachable: {0}")]
    Unreachable(String),

    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("commitment already processed by destination")]
    AlreadyProcessed,

    #[error("operation timed out")]
    TimedOut,
}

impl AdapterError {
    /// Whether the dispatcher may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Unreachable(_) | AdapterError::TimedOut)
    }
}
