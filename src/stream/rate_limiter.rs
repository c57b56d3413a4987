//! Pool-wide subscribe-request rate limiter (spec.md §4.1 "Rate limit",
//! scenario S5).
//!
//! A sliding window over the last `window` tracks subscribe attempts across
//! every connection in the pool. Once the window is full, a caller waits
//! until the oldest timestamp ages out, plus one second, before issuing.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub struct RateLimiter {
    window: Duration,
    max_per_window: u32,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            window,
            max_per_window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_per_window as usize)),
        }
    }

    /// Blocks until a subscribe attempt is permitted, then records it.
    pub async fn acquire(&self) {
        loop {
            let wait = self.try_acquire_or_wait().await;
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }

    async fn try_acquire_or_wait(&self) -> Option<Duration> {
        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();

        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if (timestamps.len() as u32) < self.max_per_window {
            timestamps.push_back(now);
            None
        } else {
            let oldest = *timestamps.front().expect("non-empty when at capacity");
            let age_out_in = self.window.saturating_sub(now.duration_since(oldest));
            Some(age_out_in + Duration::from_secs(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn scenario_s5_thirtieth_attempt_is_free_thirtyfirst_waits_six_seconds() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 30);

        for _ in 0..30 {
            limiter.acquire().await;
            tokio::time::advance(Duration::from_millis(55_000 / 30)).await;
        }

        let started = Instant::now();
        limiter.acquire().await;
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(6), "expected >= 6s wait, got {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_within_capacity_never_defer() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 30);
        for _ in 0..30 {
            let started = Instant::now();
            limiter.acquire().await;
            assert_eq!(started.elapsed(), Duration::ZERO);
        }
    }
}
