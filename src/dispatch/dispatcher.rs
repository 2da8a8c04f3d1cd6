//! One reconciliation cycle: enrich the snapshot, fold it into the state
//! manager, then fire whatever side effects the result calls for.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::effects::{EffectPort, SideEffect, SoundKind};
use crate::cache::{EnrichmentCache, Fetched};
use crate::enrichment::{CheckResponse, NextAction};
use crate::github::{BlockingFlags, Direction, PullRequest, Snapshot};
use crate::ratelimit::BrowserLimiter;
use crate::state::PrStateManager;
use crate::util::clock::{Clock, elapsed_between};

#[derive(Debug, Clone, Copy)]
pub struct NotificationSettings {
    pub audio_cues: bool,
    pub auto_open_browser: bool,
    /// No sounds until this long after startup.
    pub startup_quiet: Duration,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            audio_cues: true,
            auto_open_browser: false,
            startup_quiet: Duration::from_secs(60),
        }
    }
}

/// Everything a [`Dispatcher`] needs.
pub struct DispatchContext {
    /// `None` when enrichment is disabled; no PR is then considered blocked.
    pub enrichment: Option<EnrichmentCache>,
    pub state: Arc<PrStateManager>,
    pub browser: Arc<BrowserLimiter>,
    pub effects: Arc<dyn EffectPort>,
    pub clock: Arc<dyn Clock>,
    /// Login whose next actions count.
    pub user: String,
    pub hidden_orgs: HashSet<String>,
    pub settings: NotificationSettings,
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub snapshot: Snapshot,
    pub notified: Vec<PullRequest>,
    pub cache_hits: usize,
    pub fetched: usize,
    pub failures: usize,
}

pub struct Dispatcher {
    enrichment: Option<EnrichmentCache>,
    state: Arc<PrStateManager>,
    browser: Arc<BrowserLimiter>,
    effects: Arc<dyn EffectPort>,
    clock: Arc<dyn Clock>,
    user: String,
    hidden_orgs: HashSet<String>,
    settings: NotificationSettings,
    semaphore: Semaphore,
    start_time: DateTime<Utc>,
}

/// Blocking flags for `user` from an enrichment verdict.
pub fn flags_from(data: &CheckResponse, user: &str) -> BlockingFlags {
    let mut flags = BlockingFlags {
        test_state: data.pull_request.test_state.clone(),
        ..BlockingFlags::default()
    };
    if let Some(action) = data.action_for(user) {
        flags.needs_review = true;
        flags.is_blocked = action.critical;
        flags.action_reason = action.reason.clone();
        flags.action_kind = action.kind.clone();
    }
    flags
}

/// The user's own drafts never pop up on their own; everything else does as
/// long as it is waiting on the user.
pub fn should_auto_open(pr: &PullRequest, user: &str) -> bool {
    if pr.is_draft && pr.author == user {
        return false;
    }
    pr.is_blocking()
}

fn notification_for(pr: &PullRequest) -> SideEffect {
    let title = match pr.direction {
        Direction::Incoming => "PR Blocked on You",
        Direction::Outgoing => "Your PR is Blocked",
    };
    SideEffect::Notify {
        title: title.to_string(),
        body: format!("{} #{}: {}", pr.repository, pr.number, pr.title),
    }
}

fn sound_for(direction: Direction) -> SoundKind {
    match direction {
        Direction::Incoming => SoundKind::Honk,
        Direction::Outgoing => SoundKind::Rocket,
    }
}

/// Side effects for one batch of newly blocked PRs: a notification each, at
/// most one sound per kind, and auto-open candidates.
pub fn plan_notifications(
    to_notify: &[PullRequest],
    user: &str,
    settings: &NotificationSettings,
    in_quiet_period: bool,
) -> Vec<SideEffect> {
    let mut effects = Vec::new();
    let mut sounds: Vec<SoundKind> = Vec::new();

    for pr in to_notify {
        effects.push(notification_for(pr));

        let sound = sound_for(pr.direction);
        if settings.audio_cues && !in_quiet_period && !sounds.contains(&sound) {
            sounds.push(sound);
            effects.push(SideEffect::PlaySound(sound));
        }

        if settings.auto_open_browser && should_auto_open(pr, user) {
            effects.push(SideEffect::OpenUrl(pr.url.clone()));
        }
    }
    effects
}

impl Dispatcher {
    pub fn new(ctx: DispatchContext) -> Self {
        let start_time = ctx.state.start_time();
        Self {
            enrichment: ctx.enrichment,
            state: ctx.state,
            browser: ctx.browser,
            effects: ctx.effects,
            clock: ctx.clock,
            user: ctx.user,
            hidden_orgs: ctx.hidden_orgs,
            settings: ctx.settings,
            semaphore: Semaphore::new(ctx.max_concurrency.max(1)),
            start_time,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn hidden_orgs(&self) -> &HashSet<String> {
        &self.hidden_orgs
    }

    fn in_quiet_period(&self) -> bool {
        elapsed_between(self.start_time, self.clock.now()) < self.settings.startup_quiet
    }

    /// Enriches, reconciles and notifies for one poll's worth of PRs.
    pub async fn run_cycle(&self, mut snapshot: Snapshot, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();
        self.enrich(&mut snapshot, cancel, &mut report).await;

        let to_notify = self
            .state
            .reconcile(&snapshot.incoming, &snapshot.outgoing, &self.hidden_orgs);
        if !to_notify.is_empty() {
            info!(count = to_notify.len(), "Sending notifications");
        }
        let effects = plan_notifications(
            &to_notify,
            &self.user,
            &self.settings,
            self.in_quiet_period(),
        );
        self.execute(&effects);

        report.snapshot = snapshot;
        report.notified = to_notify;
        report
    }

    async fn enrich(&self, snapshot: &mut Snapshot, cancel: &CancellationToken, report: &mut CycleReport) {
        let Some(enrichment) = &self.enrichment else {
            debug!("Enrichment disabled, skipping");
            return;
        };

        let lookups = snapshot.iter().map(|pr| {
            let url = pr.url.clone();
            let updated_at = pr.updated_at;
            async move {
                let _permit = self.semaphore.acquire().await.ok()?;
                match enrichment
                    .fetch(&url, &self.user, updated_at, false, cancel)
                    .await
                {
                    Ok(fetched) => Some(Ok((url, fetched))),
                    Err(e) if e.is_cancelled() => None,
                    Err(e) => {
                        warn!(url = %url, error = %e, "Enrichment lookup failed");
                        Some(Err(()))
                    }
                }
            }
        });
        let results = futures::future::join_all(lookups).await;

        let mut verdicts: HashMap<String, Fetched> = HashMap::new();
        for result in results.into_iter().flatten() {
            match result {
                Ok((url, fetched)) => {
                    if fetched.from_cache {
                        report.cache_hits += 1;
                    } else {
                        report.fetched += 1;
                    }
                    verdicts.insert(url, fetched);
                }
                Err(()) => report.failures += 1,
            }
        }

        // A lookup that failed or was cancelled keeps the last blocked
        // verdict, so one bad response does not read as an unblock.
        for pr in snapshot.iter_mut() {
            match verdicts.get(&pr.url) {
                Some(fetched) => pr.flags = flags_from(&fetched.data, &self.user),
                None => {
                    if let Some(previous) = self.state.state(&pr.url) {
                        debug!(url = %pr.url, "No fresh verdict, keeping previous blocking flags");
                        pr.flags = previous.pr.flags;
                    }
                }
            }
        }
        debug!(
            cache_hits = report.cache_hits,
            fetched = report.fetched,
            failures = report.failures,
            "Enrichment complete"
        );
    }

    /// Notifies about a PR that a push event found newly blocked and records
    /// it as notified.
    pub fn notify_event(&self, pr: &PullRequest, action: &NextAction) {
        let mut effects = vec![SideEffect::Notify {
            title: format!("PR Event: #{} needs {}", pr.number, action.kind),
            body: format!("{} #{} - {}", pr.repository, pr.number, action.reason),
        }];
        if self.settings.audio_cues && !self.in_quiet_period() {
            effects.push(SideEffect::PlaySound(SoundKind::Honk));
        }
        if self.settings.auto_open_browser && should_auto_open(pr, &self.user) {
            effects.push(SideEffect::OpenUrl(pr.url.clone()));
        }
        self.execute(&effects);
        self.state.record_notified(pr);
    }

    /// Performs `effects`. Failures are logged; nothing here is retried.
    pub fn execute(&self, effects: &[SideEffect]) {
        for effect in effects {
            match effect {
                SideEffect::Notify { title, body } => {
                    if let Err(e) = self.effects.notify(title, body) {
                        warn!(title = %title, error = %e, "Failed to send notification");
                    }
                }
                SideEffect::PlaySound(kind) => {
                    debug!(sound = %kind, "Playing sound");
                    if let Err(e) = self.effects.play_sound(*kind) {
                        warn!(sound = %kind, error = %e, "Failed to play sound");
                    }
                }
                SideEffect::OpenUrl(url) => {
                    if !self.browser.can_open(self.start_time, url) {
                        continue;
                    }
                    match self.effects.open_url(url) {
                        Ok(()) => {
                            self.browser.record_open(url);
                            info!(url = %url, "Auto-opened PR in browser");
                        }
                        Err(e) => warn!(url = %url, error = %e, "Failed to auto-open PR"),
                    }
                }
            }
        }
    }
}
