use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Enrichment verdict for one PR, as seen by one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    #[serde(default)]
    pub pull_request: PullRequestStatus,
    #[serde(default)]
    pub analysis: Analysis,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullRequestStatus {
    /// `open` or `closed`.
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub draft: bool,
    /// `running`, `queued`, `pending`, `passing`, `failing`, ...
    #[serde(default)]
    pub test_state: String,
    #[serde(default)]
    pub check_summary: CheckSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckSummary {
    #[serde(default)]
    pub pending: Vec<String>,
    #[serde(default)]
    pub failing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Keyed by GitHub login.
    #[serde(default)]
    pub next_action: HashMap<String, NextAction>,
    #[serde(default)]
    pub workflow_state: String,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NextAction {
    pub kind: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub critical: bool,
}

impl CheckResponse {
    /// True while a CI run is still in flight; its completion can change the
    /// verdict without touching the PR's `updated_at`.
    pub fn has_running_checks(&self) -> bool {
        matches!(
            self.pull_request.test_state.as_str(),
            "running" | "queued" | "pending"
        )
    }

    pub fn pending_checks(&self) -> usize {
        self.pull_request.check_summary.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.pull_request.state == "closed" || self.pull_request.merged
    }

    pub fn action_for(&self, login: &str) -> Option<&NextAction> {
        self.analysis.next_action.get(login)
    }
}
