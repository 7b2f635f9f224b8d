//! Sliding-window admission control.
//!
//! Each key keeps the timestamps of its admissions inside the trailing window.
//! A caller that finds the window full sleeps until the oldest admission ages
//! out and then re-checks, so requests are delayed rather than rejected.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::util::{lock_unpoisoned, millis};
use crate::{ApiError, Result};

/// Per-key sliding-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Admits at most `max_requests` (minimum 1) per trailing `window` for every key.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until `key` has a free slot, then records it.
    ///
    /// There is no upper bound on the wait; see [`RateLimiter::acquire_with_deadline`].
    pub async fn acquire(&self, key: &str) {
        while let Some(wait) = self.try_admit(key, Instant::now()) {
            Self::wait_for_slot(key, wait).await;
        }
    }

    /// Like [`RateLimiter::acquire`], but gives up with
    /// [`ApiError::RateLimitTimeout`] when the cumulative wait would exceed
    /// `deadline`. A caller that gives up does not consume a slot.
    pub async fn acquire_with_deadline(&self, key: &str, deadline: Option<Duration>) -> Result<()> {
        let Some(deadline) = deadline else {
            self.acquire(key).await;
            return Ok(());
        };

        let started = Instant::now();
        while let Some(wait) = self.try_admit(key, Instant::now()) {
            let total = started.elapsed() + wait;
            if total > deadline {
                return Err(ApiError::RateLimitTimeout {
                    key: key.to_owned(),
                    wait_ms: millis(total),
                });
            }
            Self::wait_for_slot(key, wait).await;
        }
        Ok(())
    }

    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    async fn wait_for_slot(key: &str, wait: Duration) {
        #[cfg(feature = "tracing")]
        tracing::debug!(key, wait_ms = millis(wait), "rate limit window full, waiting");

        sleep(wait).await;
    }

    /// Number of keys with at least one admission still inside the window.
    pub fn active_keys(&self) -> usize {
        let now = Instant::now();
        let windows = lock_unpoisoned(&self.windows);
        windows
            .values()
            .filter(|stamps| {
                stamps
                    .back()
                    .is_some_and(|latest| now.duration_since(*latest) < self.window)
            })
            .count()
    }

    /// Records an admission and returns `None`, or returns how long to wait.
    fn try_admit(&self, key: &str, now: Instant) -> Option<Duration> {
        let mut windows = lock_unpoisoned(&self.windows);
        let stamps = windows.entry(key.to_owned()).or_default();

        while stamps
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
        {
            stamps.pop_front();
        }

        if stamps.len() < self.max_requests {
            stamps.push_back(now);
            return None;
        }

        stamps
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
    }
}
