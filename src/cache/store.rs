use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::util::clock::{Clock, elapsed_between};

/// One JSON file per key under a private directory.
#[derive(Clone)]
pub struct CacheStore {
    dir: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    /// Subject timestamp the entry was computed for.
    pub updated_at: DateTime<Utc>,
}

/// Stable key for a subject URL at a given last-modified time.
pub fn cache_key(url: &str, updated_at: DateTime<Utc>) -> String {
    let raw = format!(
        "{url}-{}",
        updated_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    );
    let digest = Sha256::digest(raw.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

impl CacheStore {
    pub fn new(dir: PathBuf, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { dir, ttl, clock }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        let safe_key = key.replace(['/', '\\'], "_");
        self.dir.join(format!("{safe_key}.json"))
    }

    /// Returns the entry for `key` if present, parseable and younger than the
    /// TTL. Unparseable files are removed.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<CacheEntry<T>> {
        let path = self.path_for_key(key);
        let content = fs::read_to_string(&path).ok()?;

        let entry: CacheEntry<T> = match serde_json::from_str(&content) {
            Ok(e) => e,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to parse cache entry, removing");
                if let Err(e) = fs::remove_file(&path) {
                    debug!(key = key, error = %e, "Failed to remove corrupt cache entry");
                }
                return None;
            }
        };

        let age = elapsed_between(entry.cached_at, self.clock.now());
        if age >= self.ttl {
            debug!(key = key, age_secs = age.as_secs(), "Cache entry expired");
            return None;
        }

        debug!(key = key, age_secs = age.as_secs(), "Cache hit");
        Some(entry)
    }

    pub fn set<T: Serialize>(&self, key: &str, data: &T, updated_at: DateTime<Utc>) -> Result<()> {
        self.ensure_dir()?;

        let entry = CacheEntry {
            data,
            cached_at: self.clock.now(),
            updated_at,
        };
        let content = serde_json::to_vec(&entry).context("Failed to serialize cache entry")?;

        let path = self.path_for_key(key);
        let mut file = private_file(&path)
            .with_context(|| format!("Failed to open cache file: {}", path.display()))?;
        file.write_all(&content)
            .with_context(|| format!("Failed to write cache file: {}", path.display()))?;

        debug!(key = key, "Cache set");
        Ok(())
    }

    pub fn invalidate(&self, key: &str) -> Result<()> {
        let path = self.path_for_key(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove cache file: {}", path.display()))?;
            debug!(key = key, "Cache invalidated");
        }
        Ok(())
    }

    pub fn invalidate_all(&self) -> Result<()> {
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    fs::remove_file(&path)?;
                }
            }
            debug!("All cache entries invalidated");
        }
        Ok(())
    }

    /// Removes entry files whose modification time is older than `max_age`.
    /// Returns how many were removed.
    pub fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read cache directory: {}", self.dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Failed to stat cache file");
                    continue;
                }
            };
            if modified < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old cache file"),
                }
            }
        }

        if removed > 0 {
            info!(count = removed, "Cleaned up old cache files");
        }
        Ok(removed)
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory: {}", self.dir.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700)).with_context(
                || format!("Failed to restrict cache directory: {}", self.dir.display()),
            )?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn private_file(path: &std::path::Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn private_file(path: &std::path::Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}
