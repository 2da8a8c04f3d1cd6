use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::util::clock::{Clock, elapsed_between};

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
pub struct BrowserLimits {
    pub max_per_minute: usize,
    pub max_per_day: usize,
    /// Nothing opens until this long after startup.
    pub startup_delay: Duration,
}

impl Default for BrowserLimits {
    fn default() -> Self {
        Self {
            max_per_minute: 2,
            max_per_day: 10,
            startup_delay: Duration::from_secs(60),
        }
    }
}

/// Bounds how often PRs are opened in the browser without user action.
pub struct BrowserLimiter {
    state: Mutex<OpenHistory>,
    limits: BrowserLimits,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct OpenHistory {
    opened: HashSet<String>,
    last_minute: Vec<DateTime<Utc>>,
    today: Vec<DateTime<Utc>>,
}

impl OpenHistory {
    fn prune(&mut self, now: DateTime<Utc>) {
        self.last_minute
            .retain(|t| elapsed_between(*t, now) < MINUTE);
        self.today.retain(|t| elapsed_between(*t, now) < DAY);
    }
}

impl BrowserLimiter {
    pub fn new(limits: BrowserLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(OpenHistory::default()),
            limits,
            clock,
        }
    }

    /// Whether `url` may be auto-opened now. Does not record anything; call
    /// [`record_open`](Self::record_open) once the tab has actually opened.
    pub fn can_open(&self, start_time: DateTime<Utc>, url: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.opened.contains(url) {
            debug!(url = url, "Browser open skipped: already opened");
            return false;
        }
        if elapsed_between(start_time, now) < self.limits.startup_delay {
            debug!(url = url, "Browser open skipped: startup delay");
            return false;
        }

        state.prune(now);
        if state.last_minute.len() >= self.limits.max_per_minute {
            debug!(
                url = url,
                limit = self.limits.max_per_minute,
                "Browser open skipped: per-minute limit"
            );
            return false;
        }
        if state.today.len() >= self.limits.max_per_day {
            debug!(
                url = url,
                limit = self.limits.max_per_day,
                "Browser open skipped: daily limit"
            );
            return false;
        }
        true
    }

    pub fn record_open(&self, url: &str) {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.opened.insert(url.to_string());
        state.last_minute.push(now);
        state.today.push(now);
    }

    /// Forgets which PRs were opened. The rolling windows are kept.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.opened.clear();
    }

    pub fn opened_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .opened
            .len()
    }
}
