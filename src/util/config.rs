use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Watch this user's PRs instead of the authenticated viewer's.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub hidden_orgs: Vec<String>,
    #[serde(default = "default_max_prs")]
    pub max_prs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_enrichment_url")]
    pub api_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_enrichment_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Event stream endpoint. The real-time monitor stays off when unset.
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_dedup_max_entries")]
    pub dedup_max_entries: usize,
    #[serde(default = "default_dedup_max_age")]
    pub dedup_max_age_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
    #[serde(default = "default_stale_discovery")]
    pub stale_discovery_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_ci_bypass")]
    pub ci_bypass_secs: u64,
    #[serde(default = "default_cleanup_after")]
    pub cleanup_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub auto_open_browser: bool,
    #[serde(default = "default_true")]
    pub audio_cues: bool,
    #[serde(default = "default_startup_quiet")]
    pub startup_quiet_secs: u64,
    #[serde(default = "default_opens_per_minute")]
    pub max_opens_per_minute: usize,
    #[serde(default = "default_opens_per_day")]
    pub max_opens_per_day: usize,
    /// Program invoked with the sound kind as its only argument.
    #[serde(default)]
    pub sound_command: Option<String>,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_enrichment_url() -> String {
    "https://turn.ready-to-review.dev".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_prs() -> usize {
    200
}
fn default_enrichment_timeout() -> u64 {
    10
}
fn default_max_concurrency() -> usize {
    10
}
fn default_dedup_window() -> u64 {
    5
}
fn default_dedup_max_entries() -> usize {
    1000
}
fn default_dedup_max_age() -> u64 {
    3600
}
fn default_queue_capacity() -> usize {
    100
}
fn default_poll_interval() -> u64 {
    60
}
fn default_grace_period() -> u64 {
    30
}
fn default_stale_discovery() -> u64 {
    3600
}
fn default_cache_ttl() -> u64 {
    10 * 24 * 3600
}
fn default_ci_bypass() -> u64 {
    90 * 60
}
fn default_cleanup_after() -> u64 {
    15 * 24 * 3600
}
fn default_max_attempts() -> u32 {
    10
}
fn default_initial_delay_ms() -> u64 {
    100
}
fn default_max_delay_secs() -> u64 {
    120
}
fn default_max_jitter_ms() -> u64 {
    100
}
fn default_startup_quiet() -> u64 {
    60
}
fn default_opens_per_minute() -> usize {
    2
}
fn default_opens_per_day() -> usize {
    10
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            user: None,
            hidden_orgs: Vec::new(),
            max_prs: default_max_prs(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            api_url: default_enrichment_url(),
            enabled: true,
            timeout_secs: default_enrichment_timeout(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            dedup_window_secs: default_dedup_window(),
            dedup_max_entries: default_dedup_max_entries(),
            dedup_max_age_secs: default_dedup_max_age(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
            stale_discovery_secs: default_stale_discovery(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            enabled: true,
            ttl_secs: default_cache_ttl(),
            ci_bypass_secs: default_ci_bypass(),
            cleanup_after_secs: default_cleanup_after(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            auto_open_browser: false,
            audio_cues: true,
            startup_quiet_secs: default_startup_quiet(),
            max_opens_per_minute: default_opens_per_minute(),
            max_opens_per_day: default_opens_per_day(),
            sound_command: None,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self, attempt_timeout: Duration) -> crate::retry::RetryConfig {
        crate::retry::RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
            attempt_timeout,
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_file(path);
        }

        let mut candidates = Vec::new();

        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".config/ghblock/config.toml"));
        }

        // macOS: ~/Library/Application Support/ghblock/
        if let Some(proj_dirs) = ProjectDirs::from("", "", "ghblock") {
            candidates.push(proj_dirs.config_dir().join("config.toml"));
        }

        for config_path in &candidates {
            if config_path.exists() {
                return Self::load_file(config_path);
            }
        }

        Ok(AppConfig::default())
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn cache_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.cache.dir {
            return dir.clone();
        }
        if let Some(proj_dirs) = ProjectDirs::from("", "", "ghblock") {
            return proj_dirs.cache_dir().to_path_buf();
        }
        PathBuf::from(".cache/ghblock")
    }

    pub fn log_dir(&self) -> PathBuf {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "ghblock") {
            return proj_dirs.data_dir().join("logs");
        }
        PathBuf::from(".local/share/ghblock/logs")
    }
}
