//! Interval gate shared by every poller.
//!
//! A grant is one atomic check-and-update of the owner's last-grant instant. A denied
//! call changes nothing; callers read [`RateLimiter::time_until_next_request`] to decide
//! when to try again.

use crate::util::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit interval must be > 0")]
    ZeroInterval,
}

#[derive(Debug)]
pub struct RateLimiter<C: Clock = SystemClock> {
    interval: Duration,
    last_grant: Mutex<HashMap<String, Instant>>,
    clock: C,
}

impl RateLimiter<SystemClock> {
    pub fn new(interval: Duration) -> Result<Self, RateLimitError> {
        Self::with_clock(interval, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(interval: Duration, clock: C) -> Result<Self, RateLimitError> {
        if interval.is_zero() {
            return Err(RateLimitError::ZeroInterval);
        }
        Ok(Self {
            interval,
            last_grant: Mutex::new(HashMap::new()),
            clock,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Grants at most once per interval per owner. An owner never seen before is
    /// always granted.
    pub fn acquire(&self, owner: &str) -> bool {
        let now = self.clock.now();
        let mut grants = self.lock();
        match grants.get_mut(owner) {
            Some(last) if now.saturating_duration_since(*last) < self.interval => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                grants.insert(owner.to_owned(), now);
                true
            }
        }
    }

    /// Zero when the next `acquire` for `owner` would be granted.
    pub fn time_until_next_request(&self, owner: &str) -> Duration {
        let now = self.clock.now();
        let grants = self.lock();
        grants
            .get(owner)
            .map(|last| {
                self.interval
                    .saturating_sub(now.saturating_duration_since(*last))
            })
            .unwrap_or(Duration::ZERO)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        match self.last_grant.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("rate limiter lock was poisoned; recovering and continuing");
                poisoned.into_inner()
            }
        }
    }
}
