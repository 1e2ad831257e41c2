//! Timeout defaults and async timeout wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default deadline for a single framed write
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(6000);

/// Default bound for each handshake round-trip
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default dial timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// How long the reader waits for the next frame before logging an idle tick
pub const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Run a future with a timeout, mapping expiry to `ProtocolError::Timeout`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expired_future_maps_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ProtocolError>(1)
        };
        let result = with_timeout_error(slow, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }
}
