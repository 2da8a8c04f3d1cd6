use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::util::clock::{Clock, elapsed_between};

/// Classic token bucket, refilled lazily on each call.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    max_tokens: u32,
    refill_rate: Duration,
    clock: Arc<dyn Clock>,
}

struct BucketState {
    tokens: u32,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// Starts full. One token is added per `refill_rate` of elapsed time.
    pub fn new(max_tokens: u32, refill_rate: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            state: Mutex::new(BucketState {
                tokens: max_tokens,
                last_refill: now,
            }),
            max_tokens,
            refill_rate,
            clock,
        }
    }

    /// Takes a token if one is available.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> u32 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        if self.refill_rate.is_zero() {
            state.tokens = self.max_tokens;
            return;
        }
        let now = self.clock.now();
        let elapsed = elapsed_between(state.last_refill, now);
        let to_add = elapsed.as_nanos() / self.refill_rate.as_nanos();
        if to_add > 0 {
            let to_add = u32::try_from(to_add).unwrap_or(u32::MAX);
            state.tokens = state.tokens.saturating_add(to_add).min(self.max_tokens);
            state.last_refill = now;
        }
    }
}
