//! Timeout wrappers for async operations.

use std::future::Future;
use std::time::Duration;

/// Runs `fut` with a deadline, mapping expiry into the caller's error type.
pub async fn timeout_or<Fut, T, E>(
    duration: Duration,
    fut: Fut,
    on_elapsed: impl FnOnce(Duration) -> E,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_elapsed(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_or_passes_success() {
        let result: Result<u32, &str> =
            timeout_or(Duration::from_secs(1), async { Ok(42) }, |_| "late").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_or_maps_elapsed() {
        let result: Result<(), String> = timeout_or(
            Duration::from_secs(30),
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            |d| format!("gave up after {}s", d.as_secs()),
        )
        .await;
        assert_eq!(result.unwrap_err(), "gave up after 30s");
    }

    #[tokio::test]
    async fn test_timeout_or_passes_inner_error() {
        let result: Result<(), &str> =
            timeout_or(Duration::from_secs(1), async { Err("boom") }, |_| "late").await;
        assert_eq!(result.unwrap_err(), "boom");
    }
}
