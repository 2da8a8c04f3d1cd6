//! Real-time event monitor.
//!
//! Two tasks run per start: the feed, which decodes events and hands them to
//! [`EventDelivery`], and a worker draining the bounded queue behind it. Both
//! live in a child cancellation scope that is replaced on every restart.

use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dedup::EventDedup;
use super::feed::{EventSink, FeedEvent, PULL_REQUEST_EVENT, PrLocator, PushFeed, Subscription, parse_pr_url};
use super::processor::EventProcessor;

/// Organizations whose events are acted on. Shared between the monitor and
/// its worker.
#[derive(Debug, Clone, Default)]
pub struct MonitoredOrgs(Arc<RwLock<HashSet<String>>>);

impl MonitoredOrgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, org: &str) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(org)
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Sorted copy of the current set.
    pub fn list(&self) -> Vec<String> {
        let mut orgs: Vec<String> = self
            .0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        orgs.sort();
        orgs
    }

    /// Returns false when `orgs` equals the current set.
    pub fn replace(&self, orgs: HashSet<String>) -> bool {
        let mut current = self.0.write().unwrap_or_else(PoisonError::into_inner);
        if *current == orgs {
            return false;
        }
        *current = orgs;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Queued,
    IgnoredType,
    Malformed,
    UnmonitoredOrg,
    Duplicate,
    /// The worker is behind; the event was dropped.
    QueueFull,
}

/// Filters feed events down to PRs worth re-checking and queues them.
pub struct EventDelivery {
    orgs: MonitoredOrgs,
    dedup: Arc<EventDedup>,
    queue: mpsc::Sender<PrLocator>,
}

impl EventDelivery {
    pub fn new(orgs: MonitoredOrgs, dedup: Arc<EventDedup>, queue: mpsc::Sender<PrLocator>) -> Self {
        Self { orgs, dedup, queue }
    }

    pub fn handle(&self, event: FeedEvent) -> DeliveryOutcome {
        if event.kind != PULL_REQUEST_EVENT {
            debug!(event_type = %event.kind, "Ignoring non-PR event");
            return DeliveryOutcome::IgnoredType;
        }

        let pr = match parse_pr_url(&event.url) {
            Ok(pr) => pr,
            Err(e) => {
                warn!(url = %event.url, error = %e, "Dropping PR event with unparseable URL");
                return DeliveryOutcome::Malformed;
            }
        };

        if !self.orgs.contains(&pr.org) {
            debug!(org = %pr.org, url = %pr.url, "Event from unmonitored org");
            return DeliveryOutcome::UnmonitoredOrg;
        }

        if !self.dedup.should_process(&pr.url) {
            return DeliveryOutcome::Duplicate;
        }

        info!(url = %pr.url, org = %pr.org, "PR event received");
        match self.queue.try_send(pr) {
            Ok(()) => DeliveryOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(pr)) => {
                warn!(url = %pr.url, capacity = self.queue.max_capacity(), "Event queue full, dropping event");
                DeliveryOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(pr)) => {
                debug!(url = %pr.url, "Event worker gone, dropping event");
                DeliveryOutcome::QueueFull
            }
        }
    }
}

impl EventSink for EventDelivery {
    fn deliver(&self, event: FeedEvent) {
        self.handle(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Stopped,
    Starting,
    Running,
}

#[derive(Debug)]
struct Control {
    status: MonitorStatus,
    /// Bumped on every start so that a task from an earlier run cannot stop
    /// a later one.
    generation: u64,
    scope: Option<CancellationToken>,
}

pub struct EventMonitor {
    control: Arc<Mutex<Control>>,
    orgs: MonitoredOrgs,
    feed: Arc<dyn PushFeed>,
    processor: Arc<EventProcessor>,
    dedup: Arc<EventDedup>,
    queue_capacity: usize,
    root: CancellationToken,
}

impl EventMonitor {
    /// Every run gets a child scope of `root`.
    pub fn new(
        feed: Arc<dyn PushFeed>,
        processor: Arc<EventProcessor>,
        orgs: MonitoredOrgs,
        dedup: Arc<EventDedup>,
        queue_capacity: usize,
        root: CancellationToken,
    ) -> Self {
        Self {
            control: Arc::new(Mutex::new(Control {
                status: MonitorStatus::Stopped,
                generation: 0,
                scope: None,
            })),
            orgs,
            feed,
            processor,
            dedup,
            queue_capacity: queue_capacity.max(1),
            root,
        }
    }

    pub fn status(&self) -> MonitorStatus {
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    pub fn orgs(&self) -> &MonitoredOrgs {
        &self.orgs
    }

    /// No-op when already running or when there is nothing to monitor.
    pub fn start(&self) {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if control.status != MonitorStatus::Stopped {
            debug!("Event monitor already running");
            return;
        }
        if self.orgs.is_empty() {
            debug!("No organizations to monitor, not starting");
            return;
        }
        if self.root.is_cancelled() {
            return;
        }

        control.status = MonitorStatus::Starting;
        control.generation += 1;
        let generation = control.generation;
        let scope = self.root.child_token();
        control.scope = Some(scope.clone());

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let sink: Arc<dyn EventSink> = Arc::new(EventDelivery::new(
            self.orgs.clone(),
            self.dedup.clone(),
            tx,
        ));

        let processor = self.processor.clone();
        let worker_scope = scope.clone();
        spawn_supervised("worker", self.control.clone(), generation, async move {
            run_worker(processor, rx, worker_scope).await;
            Ok(())
        });

        let feed = self.feed.clone();
        spawn_supervised("feed", self.control.clone(), generation, async move {
            feed.run(Subscription::pull_requests(), sink, scope)
                .await
                .map_err(|e| e.to_string())
        });

        control.status = MonitorStatus::Running;
        info!(orgs = ?self.orgs.list(), "Event monitor started");
    }

    pub fn stop(&self) {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if control.status == MonitorStatus::Stopped {
            return;
        }
        if let Some(scope) = control.scope.take() {
            scope.cancel();
        }
        control.status = MonitorStatus::Stopped;
        info!("Event monitor stopped");
    }

    /// Replaces the monitored set. A running monitor is restarted when the
    /// set changed. Returns whether it changed.
    pub fn update_orgs<I>(&self, orgs: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        if !self.orgs.replace(orgs.into_iter().collect()) {
            return false;
        }
        info!(orgs = ?self.orgs.list(), "Updating monitored organizations");

        if self.status() != MonitorStatus::Stopped {
            info!("Restarting event monitor with new org list");
            self.stop();
            self.start();
        }
        true
    }
}

async fn run_worker(
    processor: Arc<EventProcessor>,
    mut queue: mpsc::Receiver<PrLocator>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            pr = queue.recv() => pr,
        };
        let Some(pr) = next else { break };
        let outcome = processor.process(&pr, &cancel).await;
        debug!(url = %pr.url, outcome = ?outcome, "Processed PR event");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `task`, turning an error or a panic into a stopped monitor.
fn spawn_supervised<F>(name: &'static str, control: Arc<Mutex<Control>>, generation: u64, task: F)
where
    F: Future<Output = Result<(), String>> + Send + 'static,
{
    tokio::spawn(async move {
        let failed = match AssertUnwindSafe(task).catch_unwind().await {
            Ok(Ok(())) => {
                debug!(task = name, "Monitor task exited");
                false
            }
            Ok(Err(e)) => {
                error!(task = name, error = %e, "Monitor task failed");
                true
            }
            Err(panic) => {
                error!(task = name, panic = %panic_message(panic.as_ref()), "Monitor task panicked");
                true
            }
        };
        if !failed {
            return;
        }

        let mut control = control.lock().unwrap_or_else(PoisonError::into_inner);
        if control.generation == generation && control.status != MonitorStatus::Stopped {
            if let Some(scope) = control.scope.take() {
                scope.cancel();
            }
            control.status = MonitorStatus::Stopped;
            warn!(task = name, "Event monitor stopped after task failure");
        }
    });
}
