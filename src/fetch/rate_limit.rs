//! Minimum spacing between requests to one host.
//!
//! Boards drop connections from clients that poll too quickly, so every
//! request first calls [`RateLimiter::wait`] with its host and the source's
//! interval. The next free slot for the host is reserved under the lock
//! before sleeping, which keeps the spacing intact even if two callers race.

use rand::{Rng, rng};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

#[derive(Debug, Default)]
pub struct RateLimiter {
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until a request to `key` may be issued.
    ///
    /// Consecutive calls for the same key are at least `min_interval` apart,
    /// plus a random `0..=jitter` on top. The first call for a key returns
    /// immediately.
    pub async fn wait(&self, key: &str, min_interval: Duration, jitter: Duration) {
        let now = Instant::now();
        let slot = {
            let mut slots = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.get(key).copied().filter(|s| *s > now).unwrap_or(now);
            let extra = if jitter.is_zero() {
                Duration::ZERO
            } else {
                Duration::from_millis(rng().random_range(0..=jitter.as_millis() as u64))
            };
            slots.insert(key.to_string(), slot + min_interval + extra);
            slot
        };

        if slot > now {
            debug!(host = key, wait_ms = (slot - now).as_millis() as u64, "Rate limiting");
            sleep_until(slot).await;
        }
    }
}
