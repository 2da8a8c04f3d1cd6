use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::github::models::{PullRequest, Snapshot};

/// The PR lists from the latest poll, shared with the event monitor.
#[derive(Debug, Default)]
pub struct PrLists {
    inner: RwLock<ListsInner>,
}

#[derive(Debug, Default)]
struct ListsInner {
    snapshot: Snapshot,
    last_refresh: Option<DateTime<Utc>>,
}

impl PrLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, snapshot: Snapshot, at: DateTime<Utc>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.snapshot = snapshot;
        inner.last_refresh = Some(at);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot
            .clone()
    }

    pub fn find(&self, url: &str) -> Option<PullRequest> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.snapshot.iter().find(|pr| pr.url == url).cloned()
    }

    /// Drops `url` from both lists. Returns whether anything was removed.
    pub fn remove(&self, url: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.snapshot.len();
        inner.snapshot.incoming.retain(|pr| pr.url != url);
        inner.snapshot.outgoing.retain(|pr| pr.url != url);
        inner.snapshot.len() < before
    }

    /// (incoming, outgoing)
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        (inner.snapshot.incoming.len(), inner.snapshot.outgoing.len())
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_refresh
    }
}
