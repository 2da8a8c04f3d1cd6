//! Read-through cache in front of the enrichment API.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::{CacheStore, cache_key};
use crate::enrichment::{CheckResponse, Enricher};
use crate::github::ApiError;
use crate::retry::{RetryConfig, RetryError, retry_with_backoff};
use crate::util::clock::{Clock, elapsed_between};

#[derive(Debug, Error)]
#[error("enrichment lookup for {url} failed: {source}")]
pub struct FetchError {
    pub url: String,
    #[source]
    pub source: RetryError<ApiError>,
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub data: CheckResponse,
    pub from_cache: bool,
}

#[derive(Clone)]
pub struct EnrichmentCache {
    store: Option<CacheStore>,
    enricher: Arc<dyn Enricher>,
    retry: RetryConfig,
    ci_bypass: Duration,
    clock: Arc<dyn Clock>,
}

impl EnrichmentCache {
    /// `store` is `None` when caching is disabled; every fetch then goes
    /// upstream.
    pub fn new(
        store: Option<CacheStore>,
        enricher: Arc<dyn Enricher>,
        retry: RetryConfig,
        ci_bypass: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            enricher,
            retry,
            ci_bypass,
            clock,
        }
    }

    /// Same cache and upstream, different retry budget.
    pub fn with_retry(&self, retry: RetryConfig) -> Self {
        Self {
            retry,
            ..self.clone()
        }
    }

    /// Same upstream and retry budget, never reading or writing the store.
    /// For lookups keyed on a synthetic timestamp that no later call can hit.
    pub fn uncached(&self) -> Self {
        Self {
            store: None,
            ..self.clone()
        }
    }

    pub fn store(&self) -> Option<&CacheStore> {
        self.store.as_ref()
    }

    /// True while a check run on a subject last modified at `updated_at` is
    /// still young enough that its result may flip without `updated_at`
    /// moving.
    fn within_ci_window(&self, updated_at: DateTime<Utc>) -> bool {
        elapsed_between(updated_at, self.clock.now()) < self.ci_bypass
    }

    /// Looks up enrichment data for `url` as seen by `viewer`.
    ///
    /// With `bypass_cache` set the cached entry is never read, though the
    /// fresh result is still stored.
    pub async fn fetch(
        &self,
        url: &str,
        viewer: &str,
        updated_at: DateTime<Utc>,
        bypass_cache: bool,
        cancel: &CancellationToken,
    ) -> Result<Fetched, FetchError> {
        let key = cache_key(url, updated_at);
        let mut subject_timestamp = updated_at;

        if !bypass_cache {
            if let Some(entry) = self
                .store
                .as_ref()
                .and_then(|s| s.get::<CheckResponse>(&key))
            {
                if entry.updated_at != updated_at {
                    debug!(url = url, "Cached entry is for a different revision");
                } else if entry.data.has_running_checks() && self.within_ci_window(updated_at) {
                    // A running check can finish without bumping updated_at;
                    // ask upstream for a verdict as of now.
                    info!(
                        url = url,
                        test_state = %entry.data.pull_request.test_state,
                        "Cached entry has running checks, bypassing cache"
                    );
                    subject_timestamp = self.clock.now();
                } else {
                    return Ok(Fetched {
                        data: entry.data,
                        from_cache: true,
                    });
                }
            }
        }

        let enricher = &self.enricher;
        let data = retry_with_backoff("enrichment", &self.retry, cancel, move || {
            enricher.check(url, viewer, subject_timestamp)
        })
        .await
        .map_err(|source| FetchError {
            url: url.to_string(),
            source,
        })?;

        if let Some(store) = &self.store {
            if data.has_running_checks() && self.within_ci_window(updated_at) {
                debug!(
                    url = url,
                    pending_checks = data.pending_checks(),
                    "Not caching result with running checks"
                );
            } else if let Err(e) = store.set(&key, &data, updated_at) {
                warn!(url = url, error = %e, "Failed to save enrichment cache entry");
            }
        }

        Ok(Fetched {
            data,
            from_cache: false,
        })
    }
}
