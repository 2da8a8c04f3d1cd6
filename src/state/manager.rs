//! Tracks which PRs are currently blocked and decides when each one
//! deserves a notification.
//!
//! A record exists for a URL exactly while the PR is observed blocked. Its
//! notification phase only ever moves forward; an unblock deletes the record
//! so a later re-block starts from [`NotificationPhase::Unseen`] again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::github::PullRequest;
use crate::util::clock::{Clock, elapsed_between};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPhase {
    /// No record. Never stored; used as the starting point of [`transition`].
    Unseen,
    /// Blocked during the startup grace period; the notification is owed.
    PendingNotification,
    Notified,
}

/// Next phase for a PR observed blocked, and whether to notify now.
///
/// `stale` only matters for a PR seen for the first time: one that has not
/// been touched in a long while is recorded as already notified.
pub fn transition(
    phase: NotificationPhase,
    in_grace: bool,
    stale: bool,
) -> (NotificationPhase, bool) {
    use NotificationPhase::*;
    match (phase, in_grace, stale) {
        (Unseen, _, true) => (Notified, false),
        (Unseen, true, false) => (PendingNotification, false),
        (Unseen, false, false) => (Notified, true),
        (PendingNotification, true, _) => (PendingNotification, false),
        (PendingNotification, false, _) => (Notified, true),
        (Notified, _, _) => (Notified, false),
    }
}

#[derive(Debug, Clone)]
pub struct PrState {
    pub pr: PullRequest,
    pub first_blocked_at: DateTime<Utc>,
    pub last_seen_blocked: DateTime<Utc>,
    pub phase: NotificationPhase,
    /// Created during the startup grace period.
    pub is_initial_discovery: bool,
}

impl PrState {
    pub fn has_notified(&self) -> bool {
        self.phase == NotificationPhase::Notified
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StateTimings {
    pub grace_period: Duration,
    /// A PR first seen blocked with `updated_at` older than this is never
    /// notified.
    pub stale_after: Duration,
}

impl Default for StateTimings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            stale_after: Duration::from_secs(3600),
        }
    }
}

pub struct PrStateManager {
    states: Mutex<HashMap<String, PrState>>,
    start_time: DateTime<Utc>,
    timings: StateTimings,
    clock: Arc<dyn Clock>,
}

impl PrStateManager {
    /// The grace period is measured from the clock's current time.
    pub fn new(timings: StateTimings, clock: Arc<dyn Clock>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            start_time: clock.now(),
            timings,
            clock,
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    fn in_grace(&self, now: DateTime<Utc>) -> bool {
        elapsed_between(self.start_time, now) < self.timings.grace_period
    }

    /// Folds one full snapshot into the tracked state and returns the PRs that
    /// need a notification now.
    ///
    /// PRs from `hidden_orgs` are ignored entirely, so any record they had is
    /// dropped. Every PR from one poll must go through a single call: records
    /// not observed blocked in this call are deleted.
    pub fn reconcile(
        &self,
        incoming: &[PullRequest],
        outgoing: &[PullRequest],
        hidden_orgs: &HashSet<String>,
    ) -> Vec<PullRequest> {
        let now = self.clock.now();
        let in_grace = self.in_grace(now);

        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let mut to_notify = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for pr in incoming.iter().chain(outgoing) {
            if pr
                .org()
                .is_some_and(|org| hidden_orgs.contains(org))
            {
                continue;
            }

            if !pr.is_blocking() {
                if states.remove(&pr.url).is_some() {
                    info!(url = %pr.url, "PR no longer blocked");
                }
                continue;
            }
            seen.insert(pr.url.as_str());

            match states.get_mut(&pr.url) {
                Some(state) => {
                    state.pr = pr.clone();
                    state.last_seen_blocked = now;
                    let (phase, notify) = transition(state.phase, in_grace, false);
                    state.phase = phase;
                    if notify {
                        info!(url = %pr.url, "Grace period over, sending deferred notification");
                        to_notify.push(pr.clone());
                    }
                }
                None => {
                    let stale = elapsed_between(pr.updated_at, now) > self.timings.stale_after;
                    let (phase, notify) =
                        transition(NotificationPhase::Unseen, in_grace, stale);
                    if stale {
                        debug!(
                            url = %pr.url,
                            age = ?elapsed_between(pr.updated_at, now),
                            "Stale PR discovered blocked, not notifying"
                        );
                    } else if !notify {
                        debug!(url = %pr.url, "PR blocked during grace period, deferring");
                    } else {
                        info!(url = %pr.url, "PR newly blocked");
                        to_notify.push(pr.clone());
                    }
                    states.insert(
                        pr.url.clone(),
                        PrState {
                            pr: pr.clone(),
                            first_blocked_at: now,
                            last_seen_blocked: now,
                            phase,
                            is_initial_discovery: in_grace,
                        },
                    );
                }
            }
        }

        let before = states.len();
        states.retain(|url, _| seen.contains(url.as_str()));
        if states.len() < before {
            debug!(removed = before - states.len(), "Dropped records for PRs no longer present");
        }

        to_notify
    }

    /// Records a notification sent outside [`reconcile`](Self::reconcile),
    /// so the next poll does not announce the same block again.
    pub fn record_notified(&self, pr: &PullRequest) {
        let now = self.clock.now();
        let in_grace = self.in_grace(now);
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        match states.get_mut(&pr.url) {
            Some(state) => {
                state.pr = pr.clone();
                state.last_seen_blocked = now;
                state.phase = NotificationPhase::Notified;
            }
            None => {
                states.insert(
                    pr.url.clone(),
                    PrState {
                        pr: pr.clone(),
                        first_blocked_at: now,
                        last_seen_blocked: now,
                        phase: NotificationPhase::Notified,
                        is_initial_discovery: in_grace,
                    },
                );
            }
        }
        debug!(url = %pr.url, "Recorded notification sent from event");
    }

    /// Every PR currently tracked as blocked.
    pub fn blocked_prs(&self) -> Vec<PrState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn state(&self, url: &str) -> Option<PrState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(url)
    }

    /// Marks every tracked PR as owed a notification again.
    pub fn reset_notifications(&self) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        for state in states.values_mut() {
            state.phase = NotificationPhase::PendingNotification;
        }
        info!(count = states.len(), "Notification state reset");
    }
}
