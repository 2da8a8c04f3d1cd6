//! Per-event re-check performed by the monitor's worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event_monitor::MonitoredOrgs;
use super::feed::PrLocator;
use crate::app::state::PrLists;
use crate::cache::EnrichmentCache;
use crate::dispatch::{Dispatcher, flags_from};
use crate::util::clock::Clock;

/// Asks the poller for an immediate refresh.
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::Sender<()>,
}

impl RefreshTrigger {
    /// Requests coalesce: while one is pending, further ones are no-ops.
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// False once the poller is gone.
    pub fn request(&self, reason: &str) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => {
                debug!(reason = reason, "Refresh requested");
                true
            }
            Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    UnmonitoredOrg,
    LookupFailed,
    Cancelled,
    /// Removed from the lists and a refresh was requested.
    Closed,
    NoAction,
    NonCritical,
    /// Not in the lists yet; a refresh was requested to pick it up.
    UnknownPr,
    AlreadyBlocked,
    Notified,
}

pub struct EventProcessor {
    enrichment: EnrichmentCache,
    lists: Arc<PrLists>,
    dispatcher: Arc<Dispatcher>,
    refresh: RefreshTrigger,
    orgs: MonitoredOrgs,
    clock: Arc<dyn Clock>,
}

impl EventProcessor {
    /// `enrichment` should carry the short event retry budget. Re-checks
    /// are keyed on the current time, so they bypass the disk cache.
    pub fn new(
        enrichment: EnrichmentCache,
        lists: Arc<PrLists>,
        dispatcher: Arc<Dispatcher>,
        refresh: RefreshTrigger,
        orgs: MonitoredOrgs,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            enrichment: enrichment.uncached(),
            lists,
            dispatcher,
            refresh,
            orgs,
            clock,
        }
    }

    pub async fn process(&self, pr: &PrLocator, cancel: &CancellationToken) -> EventOutcome {
        if !self.orgs.contains(&pr.org) {
            debug!(url = %pr.url, org = %pr.org, "Org no longer monitored, skipping event");
            return EventOutcome::UnmonitoredOrg;
        }

        let user = self.dispatcher.user();
        let now = self.clock.now();
        let fetched = match self.enrichment.fetch(&pr.url, user, now, false, cancel).await {
            Ok(f) => f,
            Err(e) if e.is_cancelled() => return EventOutcome::Cancelled,
            Err(e) => {
                // the next poll will pick it up
                warn!(url = %pr.url, error = %e, "Failed to re-check PR after event");
                return EventOutcome::LookupFailed;
            }
        };
        let data = fetched.data;

        info!(
            repo = %pr.repository(),
            number = pr.number,
            cached = fetched.from_cache,
            state = %data.pull_request.state,
            merged = data.pull_request.merged,
            "Re-checked PR after event"
        );

        if data.is_closed() {
            let removed = self.lists.remove(&pr.url);
            info!(url = %pr.url, removed, "PR closed or merged, removing from lists");
            self.refresh.request("pr closed");
            return EventOutcome::Closed;
        }

        let Some(action) = data.action_for(user) else {
            debug!(url = %pr.url, user = user, "No action required for user");
            return EventOutcome::NoAction;
        };
        if !action.critical {
            debug!(url = %pr.url, action = %action.kind, "Non-critical action, skipping");
            return EventOutcome::NonCritical;
        }

        let Some(known) = self.lists.find(&pr.url) else {
            info!(url = %pr.url, action = %action.kind, "New PR detected, triggering refresh");
            self.refresh.request("unknown pr");
            return EventOutcome::UnknownPr;
        };
        if known.flags.is_blocked {
            debug!(url = %pr.url, "Already tracked as blocked, skipping notification");
            return EventOutcome::AlreadyBlocked;
        }

        info!(
            url = %pr.url,
            action = %action.kind,
            reason = %action.reason,
            "Blocking PR detected via event"
        );
        let mut pr_now = known;
        pr_now.flags = flags_from(&data, user);
        self.dispatcher.notify_event(&pr_now, action);
        EventOutcome::Notified
    }
}
