use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the PR the watched user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Someone else's PR that involves the user.
    Incoming,
    /// A PR authored by the user.
    Outgoing,
}

/// Blocking classification derived from the enrichment API on every poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingFlags {
    pub needs_review: bool,
    pub is_blocked: bool,
    pub action_reason: String,
    pub action_kind: String,
    pub test_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub url: String,
    /// `owner/name`
    pub repository: String,
    pub number: u32,
    pub title: String,
    pub author: String,
    pub updated_at: DateTime<Utc>,
    pub is_draft: bool,
    pub direction: Direction,
    #[serde(default)]
    pub flags: BlockingFlags,
}

impl PullRequest {
    /// Organization (or user) that owns the repository.
    pub fn org(&self) -> Option<&str> {
        extract_org(&self.repository)
    }

    /// True when the user's action is required to move this PR forward.
    pub fn is_blocking(&self) -> bool {
        self.flags.needs_review || self.flags.is_blocked
    }
}

/// Leading segment of an `owner/name` repository string.
///
/// A string without a slash is returned whole; one starting with a slash
/// has no owner.
pub fn extract_org(repository: &str) -> Option<&str> {
    match repository.find('/') {
        Some(0) => None,
        Some(idx) => Some(&repository[..idx]),
        None if repository.is_empty() => None,
        None => Some(repository),
    }
}

/// The two PR lists one poll produces.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub incoming: Vec<PullRequest>,
    pub outgoing: Vec<PullRequest>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.incoming.len() + self.outgoing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.outgoing.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PullRequest> {
        self.incoming.iter().chain(self.outgoing.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PullRequest> {
        self.incoming.iter_mut().chain(self.outgoing.iter_mut())
    }
}
