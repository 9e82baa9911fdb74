//! Sliding-window call budget shared by every external call of a run.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const MINUTE: Duration = Duration::from_secs(60);

/// Admits at most `limit` calls in any trailing `window`.
///
/// The check and the record happen under one lock, so concurrent callers can
/// never jointly overshoot the budget. Share it through an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `limit` calls per minute.
    pub fn per_minute(limit: NonZeroU32) -> Self {
        Self::new(limit, MINUTE)
    }

    pub fn new(limit: NonZeroU32, window: Duration) -> Self {
        let limit = limit.get() as usize;
        Self {
            limit,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits until one more call fits in the window, then records it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut admitted = self.admitted.lock().await;
                let now = Instant::now();
                self.prune(&mut admitted, now);
                if admitted.len() < self.limit {
                    admitted.push_back(now);
                    return;
                }
                // Oldest entry leaves the window first.
                match admitted.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };
            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                limit = self.limit,
                "Rate limit reached; waiting for window to free a slot"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls admitted within the trailing window right now.
    pub async fn in_window(&self) -> usize {
        let mut admitted = self.admitted.lock().await;
        self.prune(&mut admitted, Instant::now());
        admitted.len()
    }

    fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = admitted.front() {
            if now.duration_since(*oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(n: u32) -> RateLimiter {
        RateLimiter::per_minute(NonZeroU32::new(n).unwrap())
    }

    /// Asserts that no 60 s window contains more than `limit` of `times`.
    fn assert_window_respected(times: &[Instant], limit: usize) {
        for (i, start) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .filter(|t| t.duration_since(*start) < MINUTE)
                .count();
            assert!(
                in_window <= limit,
                "{in_window} acquisitions within 60s of {i}th, limit {limit}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn calls_under_the_limit_do_not_wait() {
        let limiter = limiter(3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.in_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn call_over_the_limit_waits_for_the_oldest_to_expire() {
        let limiter = limiter(2);
        let start = Instant::now();
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(Instant::now().duration_since(start), MINUTE);
        assert_eq!(limiter.in_window().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_callers_never_exceed_limit() {
        let limiter = limiter(5);
        let mut times = Vec::new();
        for _ in 0..23 {
            limiter.acquire().await;
            times.push(Instant::now());
        }
        assert_window_respected(&times, 5);
        // 23 calls at 5/min need four full windows of waiting.
        assert!(times[22].duration_since(times[0]) >= Duration::from_secs(240));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_exceed_limit() {
        let limiter = Arc::new(limiter(4));
        let mut handles = Vec::new();
        for _ in 0..17 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();
        assert_eq!(times.len(), 17);
        assert_window_respected(&times, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn window_is_configurable() {
        let limiter = RateLimiter::new(NonZeroU32::new(1).unwrap(), Duration::from_secs(2));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(Instant::now().duration_since(start), Duration::from_secs(2));
    }
}
