//! Caller-supplied deadlines for store and publish operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::store::{StoreError, StoreResult};

/// Absolute point in time by which an operation must finish.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Run `fut` and fail with `DeadlineExceeded` if it does not finish in time.
    pub async fn bound<T, F>(&self, operation: &str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout_at(self.0, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::DeadlineExceeded(operation.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bound_passes_through_results_in_time() {
        let deadline = Deadline::after(Duration::from_secs(1));
        let value = deadline.bound("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!deadline.is_expired());
    }

    #[tokio::test]
    async fn bound_times_out_slow_futures() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let result: StoreResult<()> = deadline
            .bound("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::DeadlineExceeded(op)) if op == "slow"));
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
