//! Push-feed client and the event shapes it delivers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PULL_REQUEST_EVENT: &str = "pull_request";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
}

impl FeedEvent {
    pub fn pull_request(url: impl Into<String>) -> Self {
        Self {
            kind: PULL_REQUEST_EVENT.to_string(),
            url: url.into(),
        }
    }
}

/// What the feed server should send us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// `*` subscribes to every organization the token can see.
    pub organization: String,
    pub event_types: Vec<String>,
    pub user_events_only: bool,
}

impl Subscription {
    /// Pull request events from every organization. Narrowing to the
    /// monitored orgs happens on our side.
    pub fn pull_requests() -> Self {
        Self {
            organization: "*".to_string(),
            event_types: vec![PULL_REQUEST_EVENT.to_string()],
            user_events_only: false,
        }
    }
}

/// Receives events as the feed decodes them.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: FeedEvent);
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed server rejected subscription: HTTP {status}")]
    Rejected { status: u16 },
    #[error("invalid feed server URL: {0}")]
    InvalidUrl(String),
    #[error("feed disconnected {failures} times in a row: {last}")]
    TooManyFailures { failures: u32, last: String },
}

/// A real-time event source.
///
/// `run` keeps the subscription alive, reconnecting as needed, until `cancel`
/// fires (`Ok`) or the feed gives up (`Err`).
#[async_trait]
pub trait PushFeed: Send + Sync {
    async fn run(
        &self,
        subscription: Subscription,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<(), FeedError>;
}

/// `https://github.com/{org}/{repo}/pull/{number}` broken into parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrLocator {
    pub url: String,
    pub org: String,
    pub repo: String,
    pub number: u32,
}

impl PrLocator {
    /// `org/repo`
    pub fn repository(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlParseError {
    #[error("not a github.com URL: {0}")]
    NotGithub(String),
    #[error("expected https://github.com/{{org}}/{{repo}}/pull/{{number}}: {0}")]
    WrongShape(String),
    #[error("not a pull request URL: {0}")]
    NotPullRequest(String),
    #[error("invalid pull request number in {0}")]
    BadNumber(String),
}

pub fn parse_pr_url(url: &str) -> Result<PrLocator, UrlParseError> {
    let parts: Vec<&str> = url.split('/').collect();
    if parts.len() != 7 {
        return Err(UrlParseError::WrongShape(url.to_string()));
    }
    if parts[2] != "github.com" {
        return Err(UrlParseError::NotGithub(url.to_string()));
    }
    if parts[3].is_empty() || parts[4].is_empty() || parts[5] != "pull" {
        return Err(UrlParseError::NotPullRequest(url.to_string()));
    }
    let number: u32 = parts[6]
        .parse()
        .map_err(|_| UrlParseError::BadNumber(url.to_string()))?;
    if number == 0 {
        return Err(UrlParseError::BadNumber(url.to_string()));
    }
    Ok(PrLocator {
        url: url.to_string(),
        org: parts[3].to_string(),
        repo: parts[4].to_string(),
        number,
    })
}

/// Decodes one line of the event stream. Blank lines are keep-alives.
pub fn decode_line(line: &[u8]) -> Result<Option<FeedEvent>, serde_json::Error> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(trimmed).map(Some)
}

/// Newline-delimited JSON events over a long-lived HTTP response.
pub struct HttpEventFeed {
    client: Client,
    server_url: String,
    token: String,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_consecutive_failures: u32,
}

enum StreamEnd {
    Cancelled,
    Disconnected(String),
}

impl HttpEventFeed {
    pub fn new(server_url: &str, token: &str) -> Result<Self, FeedError> {
        if !server_url.starts_with("https://") {
            return Err(FeedError::InvalidUrl(server_url.to_string()));
        }
        let client = Client::builder()
            .user_agent("ghblock")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FeedError::InvalidUrl(format!("{server_url}: {e}")))?;
        Ok(Self {
            client,
            server_url: server_url.to_string(),
            token: token.to_string(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_consecutive_failures: 10,
        })
    }

    async fn stream_once(
        &self,
        subscription: &Subscription,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd, FeedError> {
        let event_types = subscription.event_types.join(",");
        let user_only = subscription.user_events_only.to_string();
        let request = self
            .client
            .get(&self.server_url)
            .bearer_auth(&self.token)
            .header("Accept", "application/x-ndjson")
            .query(&[
                ("org", subscription.organization.as_str()),
                ("event_types", event_types.as_str()),
                ("user_events_only", user_only.as_str()),
            ])
            .send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            resp = request => match resp {
                Ok(r) => r,
                Err(e) => return Ok(StreamEnd::Disconnected(e.to_string())),
            },
        };

        let status = resp.status();
        if matches!(status.as_u16(), 401 | 403 | 404) {
            return Err(FeedError::Rejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Ok(StreamEnd::Disconnected(format!("HTTP {status}")));
        }

        info!(server = %self.server_url, "Event feed connected");
        let mut body = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    buf.extend_from_slice(&bytes);
                    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        match decode_line(&line) {
                            Ok(Some(event)) => sink.deliver(event),
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "Dropping malformed feed event"),
                        }
                    }
                }
                Some(Err(e)) => return Ok(StreamEnd::Disconnected(e.to_string())),
                None => return Ok(StreamEnd::Disconnected("stream closed by server".to_string())),
            }
        }
    }
}

#[async_trait]
impl PushFeed for HttpEventFeed {
    async fn run(
        &self,
        subscription: Subscription,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<(), FeedError> {
        let mut failures = 0u32;
        let mut backoff = self.initial_backoff;

        loop {
            let started = std::time::Instant::now();
            match self.stream_once(&subscription, sink.as_ref(), &cancel).await? {
                StreamEnd::Cancelled => {
                    debug!("Event feed stopped");
                    return Ok(());
                }
                StreamEnd::Disconnected(reason) => {
                    // A connection that stayed up for a while counts as a fresh start.
                    if started.elapsed() > self.max_backoff {
                        failures = 0;
                        backoff = self.initial_backoff;
                    }
                    failures += 1;
                    if failures >= self.max_consecutive_failures {
                        return Err(FeedError::TooManyFailures {
                            failures,
                            last: reason,
                        });
                    }
                    warn!(reason = %reason, retry_in = ?backoff, "Event feed disconnected");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}
