#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use ghblock::dispatch::{EffectPort, SideEffect, SoundKind};
use ghblock::enrichment::{CheckResponse, Enricher, NextAction};
use ghblock::github::{ApiError, Direction, PullRequest, SearchSource, Snapshot};
use ghblock::monitor::{EventSink, FeedError, FeedEvent, PushFeed, Subscription};
use ghblock::retry::RetryConfig;
use ghblock::util::clock::{Clock, ManualClock};

pub const USER: &str = "octocat";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(t0()))
}

pub fn as_clock(clock: &Arc<ManualClock>) -> Arc<dyn Clock> {
    clock.clone()
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_jitter: Duration::ZERO,
        attempt_timeout: Duration::from_secs(5),
    }
}

pub fn pr_url(repo: &str, number: u32) -> String {
    format!("https://github.com/{repo}/pull/{number}")
}

pub fn pr(repo: &str, number: u32, updated_at: DateTime<Utc>) -> PullRequest {
    PullRequest {
        url: pr_url(repo, number),
        repository: repo.to_string(),
        number,
        title: format!("Change number {number}"),
        author: "alice".to_string(),
        updated_at,
        is_draft: false,
        direction: Direction::Incoming,
        flags: Default::default(),
    }
}

pub fn blocked(mut pr: PullRequest) -> PullRequest {
    pr.flags.needs_review = true;
    pr.flags.is_blocked = true;
    pr
}

pub fn outgoing(mut pr: PullRequest) -> PullRequest {
    pr.direction = Direction::Outgoing;
    pr.author = USER.to_string();
    pr
}

pub fn action_response(user: &str, kind: &str, critical: bool) -> CheckResponse {
    let mut resp = open_response();
    resp.analysis.next_action.insert(
        user.to_string(),
        NextAction {
            kind: kind.to_string(),
            reason: format!("{kind} requested"),
            critical,
        },
    );
    resp
}

pub fn open_response() -> CheckResponse {
    let mut resp = CheckResponse::default();
    resp.pull_request.state = "open".to_string();
    resp.pull_request.test_state = "passing".to_string();
    resp
}

pub fn running(mut resp: CheckResponse) -> CheckResponse {
    resp.pull_request.test_state = "running".to_string();
    resp.pull_request.check_summary.pending = vec!["ci/build".to_string()];
    resp
}

pub fn merged_response() -> CheckResponse {
    let mut resp = CheckResponse::default();
    resp.pull_request.state = "closed".to_string();
    resp.pull_request.merged = true;
    resp
}

/// Enrichment API stand-in. Unknown URLs get an open PR with no actions.
#[derive(Default)]
pub struct FakeEnricher {
    responses: Mutex<HashMap<String, CheckResponse>>,
    failures: Mutex<HashMap<String, u16>>,
    calls: AtomicUsize,
    timestamps: Mutex<Vec<DateTime<Utc>>>,
}

impl FakeEnricher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, resp: CheckResponse) {
        self.responses.lock().unwrap().insert(url.to_string(), resp);
    }

    pub fn fail(&self, url: &str, status: u16) {
        self.failures.lock().unwrap().insert(url.to_string(), status);
    }

    pub fn recover(&self, url: &str) {
        self.failures.lock().unwrap().remove(url);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Subject timestamps passed upstream, in call order.
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.timestamps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Enricher for FakeEnricher {
    async fn check(
        &self,
        url: &str,
        _viewer: &str,
        subject_timestamp: DateTime<Utc>,
    ) -> Result<CheckResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.timestamps.lock().unwrap().push(subject_timestamp);
        if let Some(status) = self.failures.lock().unwrap().get(url) {
            return Err(ApiError::from_status(*status, false, "fake failure"));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(open_response))
    }
}

#[derive(Default)]
pub struct FakeSearch {
    pub snapshot: Mutex<Snapshot>,
    pub orgs: Vec<String>,
    pub searches: AtomicUsize,
}

impl FakeSearch {
    pub fn with(snapshot: Snapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(snapshot),
            ..Default::default()
        })
    }

    pub fn set(&self, snapshot: Snapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }
}

#[async_trait]
impl SearchSource for FakeSearch {
    async fn fetch_viewer(&self, _cancel: &CancellationToken) -> Result<String> {
        Ok(USER.to_string())
    }

    async fn list_orgs(&self, _user: &str, _cancel: &CancellationToken) -> Result<Vec<String>> {
        Ok(self.orgs.clone())
    }

    async fn search_snapshot(&self, _user: &str, _cancel: &CancellationToken) -> Result<Snapshot> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// Deliver the events, then idle until cancelled.
    Idle,
    /// Deliver the events, then give up.
    Fail,
    /// Deliver the events, then panic.
    Panic,
}

pub struct FakeFeed {
    pub events: Vec<FeedEvent>,
    pub mode: FeedMode,
    pub runs: AtomicUsize,
    pub subscriptions: Mutex<Vec<Subscription>>,
}

impl FakeFeed {
    pub fn new(events: Vec<FeedEvent>, mode: FeedMode) -> Arc<Self> {
        Arc::new(Self {
            events,
            mode,
            runs: AtomicUsize::new(0),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushFeed for FakeFeed {
    async fn run(
        &self,
        subscription: Subscription,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<(), FeedError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().unwrap().push(subscription);
        for event in &self.events {
            sink.deliver(event.clone());
        }
        match self.mode {
            FeedMode::Idle => {
                cancel.cancelled().await;
                Ok(())
            }
            FeedMode::Fail => Err(FeedError::Rejected { status: 401 }),
            FeedMode::Panic => panic!("feed blew up"),
        }
    }
}

/// Records every side effect instead of performing it.
#[derive(Default)]
pub struct RecordingEffects {
    effects: Mutex<Vec<SideEffect>>,
    pub fail_opens: bool,
}

impl RecordingEffects {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_opens() -> Arc<Self> {
        Arc::new(Self {
            fail_opens: true,
            ..Default::default()
        })
    }

    pub fn effects(&self) -> Vec<SideEffect> {
        self.effects.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.effects()
            .into_iter()
            .filter_map(|e| match e {
                SideEffect::Notify { title, body } => Some((title, body)),
                _ => None,
            })
            .collect()
    }

    pub fn sounds(&self) -> Vec<SoundKind> {
        self.effects()
            .into_iter()
            .filter_map(|e| match e {
                SideEffect::PlaySound(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    pub fn opened(&self) -> Vec<String> {
        self.effects()
            .into_iter()
            .filter_map(|e| match e {
                SideEffect::OpenUrl(url) => Some(url),
                _ => None,
            })
            .collect()
    }
}

impl EffectPort for RecordingEffects {
    fn notify(&self, title: &str, body: &str) -> Result<()> {
        self.effects.lock().unwrap().push(SideEffect::Notify {
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn play_sound(&self, kind: SoundKind) -> Result<()> {
        self.effects.lock().unwrap().push(SideEffect::PlaySound(kind));
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<()> {
        if self.fail_opens {
            anyhow::bail!("no browser");
        }
        self.effects
            .lock()
            .unwrap()
            .push(SideEffect::OpenUrl(url.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub enricher: Arc<FakeEnricher>,
    pub effects: Arc<RecordingEffects>,
    pub state: Arc<ghblock::state::PrStateManager>,
    pub browser: Arc<ghblock::ratelimit::BrowserLimiter>,
    pub dispatcher: Arc<ghblock::dispatch::Dispatcher>,
    pub enrichment: ghblock::cache::EnrichmentCache,
}

/// A dispatcher over fakes with no disk cache, started at [`t0`].
pub fn harness(settings: ghblock::dispatch::NotificationSettings) -> Harness {
    use ghblock::cache::EnrichmentCache;
    use ghblock::dispatch::{DispatchContext, Dispatcher};
    use ghblock::ratelimit::{BrowserLimiter, BrowserLimits};
    use ghblock::state::{PrStateManager, StateTimings};

    let clock = manual_clock();
    let enricher = FakeEnricher::new();
    let effects = RecordingEffects::new();
    let enrichment = EnrichmentCache::new(
        None,
        enricher.clone(),
        fast_retry(),
        Duration::from_secs(90 * 60),
        as_clock(&clock),
    );
    let state = Arc::new(PrStateManager::new(StateTimings::default(), as_clock(&clock)));
    let browser = Arc::new(BrowserLimiter::new(
        BrowserLimits {
            max_per_minute: 2,
            max_per_day: 10,
            startup_delay: settings.startup_quiet,
        },
        as_clock(&clock),
    ));
    let dispatcher = Arc::new(Dispatcher::new(DispatchContext {
        enrichment: Some(enrichment.clone()),
        state: state.clone(),
        browser: browser.clone(),
        effects: effects.clone(),
        clock: as_clock(&clock),
        user: USER.to_string(),
        hidden_orgs: Default::default(),
        settings,
        max_concurrency: 4,
    }));
    Harness {
        clock,
        enricher,
        effects,
        state,
        browser,
        dispatcher,
        enrichment,
    }
}

pub fn loud_settings() -> ghblock::dispatch::NotificationSettings {
    ghblock::dispatch::NotificationSettings {
        audio_cues: true,
        auto_open_browser: true,
        startup_quiet: Duration::from_secs(60),
    }
}
