//! Async utilities
//!
//! Bounded waiting for network legs so callers never hang on a silent backend.

use crate::error::{ErrorContext, HydroError, HydroResult};
use std::future::Future;
use tokio::time::{timeout, Duration};
use tracing::warn;

/// Timeout wrapper for async operations
pub async fn with_timeout<F, T>(future: F, timeout_ms: u64, operation_name: &str) -> HydroResult<T>
where
    F: Future<Output = T>,
{
    match timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => Ok(result),
        Err(_) => {
            warn!(
                operation = operation_name,
                timeout_ms = timeout_ms,
                "Operation timed out"
            );
            Err(HydroError::Timeout {
                operation: operation_name.to_string(),
                duration_ms: timeout_ms,
                context: ErrorContext::new("async_utils")
                    .with_operation("timeout")
                    .with_metadata("timeout_ms", &timeout_ms.to_string())
                    .with_suggestion("Increase timeout duration")
                    .with_suggestion("Check network connectivity")
                    .with_suggestion("Verify service availability"),
            })
        }
    }
}

/// Same as [`with_timeout`] for futures that already yield a `HydroResult`
pub async fn try_with_timeout<F, T>(
    future: F,
    timeout_ms: u64,
    operation_name: &str,
) -> HydroResult<T>
where
    F: Future<Output = HydroResult<T>>,
{
    with_timeout(future, timeout_ms, operation_name).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_completes() {
        let result = with_timeout(async { 42 }, 100, "fast").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            tokio::time::sleep(Duration::from_millis(200)),
            10,
            "slow_operation",
        )
        .await;

        match result {
            Err(HydroError::Timeout {
                operation,
                duration_ms,
                ..
            }) => {
                assert_eq!(operation, "slow_operation");
                assert_eq!(duration_ms, 10);
            }
            other => panic!("Expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_try_with_timeout_flattens_inner_error() {
        let result: HydroResult<()> = try_with_timeout(
            async {
                Err(HydroError::Api {
                    status: 401,
                    detail: "expired".to_string(),
                    context: ErrorContext::new("test"),
                })
            },
            100,
            "inner",
        )
        .await;

        assert!(result.unwrap_err().is_unauthorized());
    }
}
