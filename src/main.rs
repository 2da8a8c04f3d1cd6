use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use ghblock::app::{self, AppContext, PrLists};
use ghblock::cache::{CacheStore, EnrichmentCache};
use ghblock::dispatch::{DesktopEffects, DispatchContext, Dispatcher, NotificationSettings, ProcessCommands};
use ghblock::enrichment::TurnClient;
use ghblock::github::{self, GithubClient, SearchSource};
use ghblock::monitor::{
    DedupSettings, EventDedup, EventMonitor, EventProcessor, HttpEventFeed, MonitoredOrgs,
    RefreshTrigger,
};
use ghblock::ratelimit::{BrowserLimiter, BrowserLimits, TokenBucket};
use ghblock::retry::RetryConfig;
use ghblock::state::{PrStateManager, StateTimings};
use ghblock::util::clock::{Clock, SystemClock};
use ghblock::util::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "ghblock", version, about = "Notifies you when pull requests are blocked on you")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Disable disk cache
    #[arg(long)]
    no_cache: bool,

    /// Drop all cached enrichment results on startup
    #[arg(short, long)]
    refresh: bool,

    /// Watch this user's PRs instead of the authenticated user's
    #[arg(short, long)]
    user: Option<String>,

    /// Poll interval in seconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Also write logs to a daily file under the data directory
    #[arg(long)]
    log_file: bool,
}

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(interval) = cli.interval {
        config.poll.interval_secs = interval;
    }
    if let Some(user) = cli.user {
        config.github.user = Some(user);
    }

    let _guard = setup_logging(&config, cli.debug, cli.log_file)?;

    info!("ghblock starting");

    let token = match github::auth::resolve_token() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Authentication error: {e}");
            std::process::exit(1);
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let root = CancellationToken::new();

    let search = Arc::new(GithubClient::new(
        &token,
        &config.github.api_url,
        config.retry.to_retry_config(ATTEMPT_TIMEOUT),
        config.github.max_prs,
    )?);

    let viewer = match search.fetch_viewer(&root).await {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Failed to authenticate with GitHub: {e:#}");
            eprintln!("Please check your token and try again.");
            std::process::exit(1);
        }
    };
    info!(login = %viewer, "Authenticated as {}", viewer);

    let user = match config.github.user.clone() {
        Some(target) => {
            info!(user = %target, "Watching PRs of configured user");
            target
        }
        None => viewer,
    };

    let cache_store = if cli.no_cache || !config.cache.enabled {
        None
    } else {
        let store = CacheStore::new(
            config.cache_dir(),
            Duration::from_secs(config.cache.ttl_secs),
            clock.clone(),
        );
        if cli.refresh {
            store.invalidate_all()?;
        }
        Some(store)
    };

    let enrichment = if config.enrichment.enabled {
        let client = TurnClient::new(&config.enrichment.api_url, &token)?;
        Some(EnrichmentCache::new(
            cache_store.clone(),
            Arc::new(client),
            config
                .retry
                .to_retry_config(Duration::from_secs(config.enrichment.timeout_secs)),
            Duration::from_secs(config.cache.ci_bypass_secs),
            clock.clone(),
        ))
    } else {
        warn!("Enrichment disabled; no PR will be reported as blocked");
        None
    };

    let hidden_orgs: HashSet<String> = config.github.hidden_orgs.iter().cloned().collect();
    let state = Arc::new(PrStateManager::new(
        StateTimings {
            grace_period: Duration::from_secs(config.state.grace_period_secs),
            stale_after: Duration::from_secs(config.state.stale_discovery_secs),
        },
        clock.clone(),
    ));
    let browser = Arc::new(BrowserLimiter::new(
        BrowserLimits {
            max_per_minute: config.notifications.max_opens_per_minute,
            max_per_day: config.notifications.max_opens_per_day,
            startup_delay: Duration::from_secs(config.notifications.startup_quiet_secs),
        },
        clock.clone(),
    ));
    let effects = Arc::new(DesktopEffects::new(
        Arc::new(ProcessCommands),
        config.notifications.sound_command.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(DispatchContext {
        enrichment: enrichment.clone(),
        state,
        browser,
        effects,
        clock: clock.clone(),
        user: user.clone(),
        hidden_orgs: hidden_orgs.clone(),
        settings: NotificationSettings {
            audio_cues: config.notifications.audio_cues,
            auto_open_browser: config.notifications.auto_open_browser,
            startup_quiet: Duration::from_secs(config.notifications.startup_quiet_secs),
        },
        max_concurrency: config.enrichment.max_concurrency,
    }));

    let lists = Arc::new(PrLists::new());
    let (refresh, refresh_rx) = RefreshTrigger::channel();

    let monitor = match (&config.feed.server_url, &enrichment) {
        (Some(server_url), Some(enrichment)) => {
            let orgs = MonitoredOrgs::new();
            let processor = EventProcessor::new(
                enrichment.with_retry(RetryConfig::EVENT),
                lists.clone(),
                dispatcher.clone(),
                refresh,
                orgs.clone(),
                clock.clone(),
            );
            let dedup = EventDedup::new(
                DedupSettings {
                    window: Duration::from_secs(config.feed.dedup_window_secs),
                    max_entries: config.feed.dedup_max_entries,
                    max_age: Duration::from_secs(config.feed.dedup_max_age_secs),
                },
                clock.clone(),
            );
            Some(Arc::new(EventMonitor::new(
                Arc::new(HttpEventFeed::new(server_url, &token)?),
                Arc::new(processor),
                orgs,
                Arc::new(dedup),
                config.feed.queue_capacity,
                root.child_token(),
            )))
        }
        (Some(_), None) => {
            warn!("Event feed configured but enrichment is disabled; real-time updates off");
            None
        }
        (None, _) => {
            info!("No event feed configured; relying on polling");
            None
        }
    };

    let base_orgs = if monitor.is_some() {
        search.list_orgs(&user, &root).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to list organizations, monitoring PR orgs only");
            Vec::new()
        })
    } else {
        Vec::new()
    };

    let ctx = AppContext {
        search,
        dispatcher,
        lists,
        monitor,
        cache: cache_store,
        refresh_bucket: TokenBucket::new(3, Duration::from_secs(10), clock.clone()),
        clock,
        user,
        base_orgs,
        hidden_orgs,
        poll_interval: Duration::from_secs(config.poll.interval_secs),
        cache_cleanup_after: Duration::from_secs(config.cache.cleanup_after_secs),
    };

    let shutdown = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shutdown.cancel();
        }
    });

    app::event_loop::run(ctx, refresh_rx, root).await
}

fn setup_logging(
    config: &AppConfig,
    debug: bool,
    log_file: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_filter = if debug { "ghblock=debug" } else { "ghblock=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = if debug || log_file {
        let log_dir = config.log_dir();
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = tracing_appender::rolling::daily(&log_dir, "ghblock.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}
