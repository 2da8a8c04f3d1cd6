use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::app::state::PrLists;
use crate::cache::CacheStore;
use crate::dispatch::Dispatcher;
use crate::github::SearchSource;
use crate::monitor::EventMonitor;
use crate::ratelimit::TokenBucket;
use crate::util::clock::Clock;

/// Everything the poll loop touches, wired once in `main`.
pub struct AppContext {
    pub search: Arc<dyn SearchSource>,
    pub dispatcher: Arc<Dispatcher>,
    pub lists: Arc<PrLists>,
    pub monitor: Option<Arc<EventMonitor>>,
    /// Cleaned up at startup and once a day; `None` with caching off.
    pub cache: Option<CacheStore>,
    /// Throttles refreshes requested outside the regular schedule.
    pub refresh_bucket: TokenBucket,
    pub clock: Arc<dyn Clock>,
    pub user: String,
    /// The user's organizations, monitored on top of those seen in PRs.
    pub base_orgs: Vec<String>,
    pub hidden_orgs: HashSet<String>,
    pub poll_interval: Duration,
    pub cache_cleanup_after: Duration,
}
