// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Token-bucket rate limiting for provider APIs.
//!
//! One [`RateLimiter`] is shared by every zone of a provider account; every
//! outbound API call must pass through [`RateLimiter::accept`] first. The
//! bucket refills continuously at the configured QPS up to the burst
//! capacity, so short spikes ride on accumulated tokens while sustained
//! load converges to the QPS.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with configurable QPS and burst.
#[derive(Debug)]
pub struct RateLimiter {
    qps: f64,
    burst: f64,
    enabled: bool,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with the given sustained rate and burst capacity.
    ///
    /// A non-positive QPS disables limiting entirely.
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        RateLimiter {
            qps,
            burst,
            enabled: qps > 0.0,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// A limiter that never waits.
    #[must_use]
    pub fn unlimited() -> Self {
        RateLimiter::new(0.0, 1)
    }

    #[must_use]
    pub fn qps(&self) -> f64 {
        self.qps
    }

    /// Take one token, waiting until the bucket allows it.
    ///
    /// Callers invoke this immediately before every provider API request.
    pub async fn accept(&self) {
        if !self.enabled {
            return;
        }
        let wait = {
            let mut bucket = self.bucket.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
            bucket.last_refill = now;
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                None
            } else {
                let deficit = 1.0 - bucket.tokens;
                bucket.tokens -= 1.0;
                Some(Duration::from_secs_f64(deficit / self.qps))
            }
        };
        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Per-zone failure backoff, independent of the token bucket.
///
/// The interval starts at `min` on the first failure and grows by a factor
/// of 1.1 plus one second per further failure, capped at `max`. A success
/// resets it to zero. Throttled failures jump to at least double the
/// previous interval so a throttling provider sees markedly less traffic.
#[derive(Clone, Debug)]
pub struct FailureBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
}

impl FailureBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        FailureBackoff {
            min,
            max,
            current: Duration::ZERO,
            failures: 0,
        }
    }

    /// Defaults from the engine constants: 1s minimum, 20x cap.
    #[must_use]
    pub fn standard() -> Self {
        let min = Duration::from_secs(crate::constants::DEFAULT_BACKOFF_MIN_SECS);
        FailureBackoff::new(min, min * crate::constants::BACKOFF_MAX_FACTOR)
    }

    /// Current requeue delay; zero while healthy.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.current
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure and return the next requeue delay.
    pub fn failed(&mut self) -> Duration {
        self.failures += 1;
        self.current = if self.current.is_zero() {
            self.min
        } else {
            let grown = self.current.mul_f64(crate::constants::BACKOFF_GROWTH_FACTOR)
                + Duration::from_secs(crate::constants::BACKOFF_GROWTH_ADD_SECS);
            grown.min(self.max)
        };
        self.current
    }

    /// Record a throttled failure: at least double the previous delay.
    pub fn throttled(&mut self) -> Duration {
        let previous = self.current;
        let grown = self.failed();
        if grown < previous * 2 {
            self.current = (previous * 2).min(self.max);
        }
        self.current
    }

    /// Record a success; the delay resets to zero.
    pub fn succeeded(&mut self) {
        self.failures = 0;
        self.current = Duration::ZERO;
    }
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod ratelimit_tests;
