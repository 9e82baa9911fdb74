//! The single choke point for collaborator calls.
//!
//! Every remote call (outline, research, write, image search, image fetch)
//! acquires the run's [`RateLimiter`] and then runs under a bounded timeout.
//! Local rendering only gets the timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pipeline::CollaboratorError;

use crate::RateLimiter;

#[derive(Debug, Clone)]
pub struct Gateway {
    limiter: Arc<RateLimiter>,
    call_timeout: Duration,
}

impl Gateway {
    pub fn new(limiter: Arc<RateLimiter>, call_timeout: Duration) -> Self {
        Self {
            limiter,
            call_timeout,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Runs a rate-limited, time-bounded remote call.
    pub async fn call<T, F>(&self, label: &str, call: F) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        self.limiter.acquire().await;
        tracing::debug!(operation = label, "Calling collaborator");
        self.bounded(label, call).await
    }

    /// Runs a local call with the timeout only.
    pub async fn call_local<T, F>(&self, label: &str, call: F) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        self.bounded(label, call).await
    }

    async fn bounded<T, F>(&self, label: &str, call: F) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation = label,
                    timeout_secs = self.call_timeout.as_secs(),
                    "Collaborator call timed out"
                );
                Err(CollaboratorError::Timeout {
                    operation: label.to_string(),
                    after: self.call_timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn gateway(limit: u32, timeout: Duration) -> Gateway {
        let limiter = Arc::new(RateLimiter::per_minute(NonZeroU32::new(limit).unwrap()));
        Gateway::new(limiter, timeout)
    }

    #[tokio::test(start_paused = true)]
    async fn call_counts_against_the_limiter() {
        let gateway = gateway(5, Duration::from_secs(1));
        let value = gateway.call("search", async { Ok::<_, CollaboratorError>(7) }).await;
        assert_eq!(value, Ok(7));
        assert_eq!(gateway.limiter().in_window().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn local_call_skips_the_limiter() {
        let gateway = gateway(5, Duration::from_secs(1));
        gateway
            .call_local("render", async { Ok::<_, CollaboratorError>(()) })
            .await
            .unwrap();
        assert_eq!(gateway.limiter().in_window().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_becomes_timeout() {
        let gateway = gateway(5, Duration::from_secs(3));
        let result = gateway
            .call("write", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, CollaboratorError>("late")
            })
            .await;
        assert_eq!(
            result,
            Err(CollaboratorError::Timeout {
                operation: "write".into(),
                after: Duration::from_secs(3),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn collaborator_errors_pass_through() {
        let gateway = gateway(5, Duration::from_secs(3));
        let result: Result<(), _> = gateway
            .call("outline", async { Err(CollaboratorError::EmptyResponse) })
            .await;
        assert_eq!(result, Err(CollaboratorError::EmptyResponse));
    }
}
