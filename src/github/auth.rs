use anyhow::{Result, bail};
use std::process::Command;
use tracing::{debug, info};

/// Resolve a GitHub token, in order:
/// 1. `GITHUB_TOKEN` environment variable
/// 2. `GH_TOKEN` environment variable
/// 3. `gh auth token` subprocess
pub fn resolve_token() -> Result<String> {
    for var in ["GITHUB_TOKEN", "GH_TOKEN"] {
        if let Ok(token) = std::env::var(var) {
            let token = token.trim();
            if !token.is_empty() {
                info!(source = var, "Using GitHub token from environment");
                return Ok(token.to_string());
            }
        }
    }

    debug!("Attempting to resolve token via `gh auth token`");
    if let Ok(output) = Command::new("gh").args(["auth", "token"]).output()
        && output.status.success()
    {
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !token.is_empty() {
            info!("Token resolved via gh CLI");
            return Ok(token);
        }
    }

    bail!(
        "Could not resolve GitHub token. Please either:\n\
         - Set the GITHUB_TOKEN environment variable\n\
         - Set the GH_TOKEN environment variable\n\
         - Run `gh auth login` to authenticate with the GitHub CLI"
    )
}
