use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::util::clock::{Clock, elapsed_between};

#[derive(Debug, Clone, Copy)]
pub struct DedupSettings {
    pub window: Duration,
    /// Size above which old entries are swept.
    pub max_entries: usize,
    /// Entries older than this are dropped by a sweep.
    pub max_age: Duration,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            max_entries: 1000,
            max_age: Duration::from_secs(3600),
        }
    }
}

/// Collapses bursts of events for the same URL.
pub struct EventDedup {
    last_seen: Mutex<HashMap<String, DateTime<Utc>>>,
    settings: DedupSettings,
    clock: Arc<dyn Clock>,
}

impl EventDedup {
    pub fn new(settings: DedupSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            last_seen: Mutex::new(HashMap::new()),
            settings,
            clock,
        }
    }

    /// True if `url` has not been accepted within the window. Accepting
    /// records the time; a rejected duplicate does not extend the window.
    pub fn should_process(&self, url: &str) -> bool {
        let now = self.clock.now();
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(seen) = last_seen.get(url) {
            let since = elapsed_between(*seen, now);
            if since < self.settings.window {
                debug!(url = url, since_ms = since.as_millis() as u64, "Skipping duplicate event");
                return false;
            }
        }
        last_seen.insert(url.to_string(), now);

        if last_seen.len() > self.settings.max_entries {
            let max_age = self.settings.max_age;
            last_seen.retain(|_, seen| elapsed_between(*seen, now) <= max_age);
            debug!(entries_remaining = last_seen.len(), "Swept event dedup map");
        }
        true
    }

    pub fn len(&self) -> usize {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
