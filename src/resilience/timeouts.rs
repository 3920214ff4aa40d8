//! Request deadline enforcement.
//!
//! # Responsibilities
//! - Bound the whole client exchange, queue wait included
//! - Turn an elapsed deadline into the gateway-timeout error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry
//! - Per-attempt deadlines live in the forwarder, not here

use std::future::Future;
use std::time::Duration;

use crate::error::ProxyError;

/// Run `fut` under `deadline`.
pub async fn with_deadline<F: Future>(deadline: Duration, fut: F) -> Result<F::Output, ProxyError> {
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| ProxyError::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let slow = tokio::time::sleep(Duration::from_secs(31));
        let err = with_deadline(Duration::from_secs(30), slow).await.unwrap_err();
        assert_eq!(err, ProxyError::Timeout);

        let fast = async { 7 };
        assert_eq!(with_deadline(Duration::from_secs(30), fast).await.unwrap(), 7);
    }
}
