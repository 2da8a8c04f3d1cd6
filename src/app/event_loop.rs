use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::context::AppContext;
use crate::dispatch::CycleReport;

const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Polls on a fixed interval, on refresh requests, and sweeps the cache once
/// a day, until `cancel` fires.
pub async fn run(ctx: AppContext, mut refresh_rx: mpsc::Receiver<()>, cancel: CancellationToken) -> Result<()> {
    cleanup_cache(&ctx);

    if let Err(e) = poll_once(&ctx, &cancel).await {
        error!(error = %e, "Initial PR fetch failed");
    }

    let mut poll_timer = tokio::time::interval(ctx.poll_interval.max(Duration::from_secs(1)));
    poll_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately (already handled above)
    poll_timer.tick().await;

    let mut cleanup_timer = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
    cleanup_timer.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = poll_timer.tick() => {
                if let Err(e) = poll_once(&ctx, &cancel).await {
                    warn!(error = %e, "PR refresh failed");
                }
            }
            Some(()) = refresh_rx.recv() => {
                if !ctx.refresh_bucket.allow() {
                    debug!("Refresh request throttled");
                    continue;
                }
                if let Err(e) = poll_once(&ctx, &cancel).await {
                    warn!(error = %e, "Requested PR refresh failed");
                }
            }
            _ = cleanup_timer.tick() => cleanup_cache(&ctx),
        }
    }

    if let Some(monitor) = &ctx.monitor {
        monitor.stop();
    }
    info!("Poller stopped");
    Ok(())
}

/// One full refresh: search, enrich, reconcile, notify, then keep the event
/// monitor's org list in step with what was found.
pub async fn poll_once(ctx: &AppContext, cancel: &CancellationToken) -> Result<CycleReport> {
    let snapshot = ctx.search.search_snapshot(&ctx.user, cancel).await?;
    let report = ctx.dispatcher.run_cycle(snapshot, cancel).await;
    ctx.lists.replace(report.snapshot.clone(), ctx.clock.now());

    let (incoming, outgoing) = ctx.lists.counts();
    info!(
        incoming,
        outgoing,
        notified = report.notified.len(),
        cache_hits = report.cache_hits,
        "PR refresh complete"
    );

    if let Some(monitor) = &ctx.monitor {
        monitor.update_orgs(monitored_orgs(ctx, &report));
        monitor.start();
    }
    Ok(report)
}

fn monitored_orgs(ctx: &AppContext, report: &CycleReport) -> HashSet<String> {
    ctx.base_orgs
        .iter()
        .map(String::as_str)
        .chain(report.snapshot.iter().filter_map(|pr| pr.org()))
        .filter(|org| !ctx.hidden_orgs.contains(*org))
        .map(str::to_string)
        .collect()
}

fn cleanup_cache(ctx: &AppContext) {
    let Some(cache) = &ctx.cache else {
        return;
    };
    match cache.cleanup_older_than(ctx.cache_cleanup_after) {
        Ok(removed) => debug!(removed, "Cache cleanup complete"),
        Err(e) => warn!(error = %e, "Cache cleanup failed"),
    }
}
