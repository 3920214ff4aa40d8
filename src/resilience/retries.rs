//! Retry decisions for failed forwarding attempts.
//!
//! # Responsibilities
//! - Decide whether a failed attempt is retried against a fresh selection
//! - Name the terminal failure when it is not
//!
//! # Design Decisions
//! - `retry_on_error` is the total number of attempts, never exceeded
//! - A client that went away is never retried
//! - Retries reuse the request's queue slot; they do not queue again

use crate::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Select a backend again and forward.
    Retry,
    /// The client connection is gone.
    ClientGone,
    /// The attempt bound is reached.
    Exhausted,
    /// Retrying is turned off (bound of 0).
    Disabled,
}

impl RetryDecision {
    /// `failed` is the number of failed attempts so far, this one included.
    pub fn decide(failed: u32, bound: u32, client_gone: bool) -> Self {
        if client_gone {
            RetryDecision::ClientGone
        } else if bound == 0 {
            RetryDecision::Disabled
        } else if failed >= bound {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry
        }
    }

    /// The terminal error, if this decision ends the request.
    pub fn into_error(self) -> Option<ProxyError> {
        match self {
            RetryDecision::Retry => None,
            RetryDecision::ClientGone => Some(ProxyError::ClientGone),
            RetryDecision::Exhausted => Some(ProxyError::RetriesExhausted),
            RetryDecision::Disabled => Some(ProxyError::RetryDisabled),
        }
    }
}
