use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::models::*;
use crate::retry::{RetryConfig, retry_with_backoff};

/// The GitHub-side collaborator: who am I, which orgs, which PRs.
#[async_trait]
pub trait SearchSource: Send + Sync {
    async fn fetch_viewer(&self, cancel: &CancellationToken) -> Result<String>;

    async fn list_orgs(&self, user: &str, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Runs both PR queries for `user` and splits the merged result into
    /// incoming and outgoing. Enrichment flags are left at their defaults.
    async fn search_snapshot(&self, user: &str, cancel: &CancellationToken) -> Result<Snapshot>;
}

#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    api_url: String,
    token: String,
    retry: RetryConfig,
    max_prs: usize,
}

impl GithubClient {
    pub fn new(token: &str, api_url: &str, retry: RetryConfig, max_prs: usize) -> Result<Self> {
        if !api_url.starts_with("https://") {
            bail!("GitHub API URL must use HTTPS: {}", api_url);
        }

        let client = Client::builder()
            .user_agent("ghblock")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            retry,
            max_prs,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let resp = self
            .client
            .get(format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::network("GitHub API request failed", e))?;

        let status = resp.status();
        if !status.is_success() {
            let exhausted = resp
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                == Some("0");
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), exhausted, &text));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ApiError::network("Failed to read GitHub response", e))?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::decode("Failed to parse GitHub response", &e))
    }

    async fn get_with_retry(
        &self,
        path: &str,
        query: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<Value> {
        retry_with_backoff(path, &self.retry, cancel, move || self.get(path, query))
            .await
            .with_context(|| format!("GitHub request to {path} failed"))
    }

    async fn search_prs(&self, query: &str, cancel: &CancellationToken) -> Result<Vec<SearchHit>> {
        let data = self
            .get_with_retry(
                "/search/issues",
                &[
                    ("q", query),
                    ("per_page", "100"),
                    ("sort", "updated"),
                    ("order", "desc"),
                ],
                cancel,
            )
            .await?;

        let items = data["items"].as_array().context("Missing search items")?;
        let hits: Vec<SearchHit> = items.iter().filter_map(parse_search_hit).collect();
        debug!(query = query, count = hits.len(), "Search PRs complete");
        Ok(hits)
    }
}

#[async_trait]
impl SearchSource for GithubClient {
    async fn fetch_viewer(&self, cancel: &CancellationToken) -> Result<String> {
        let data = self.get_with_retry("/user", &[], cancel).await?;
        let login = data["login"]
            .as_str()
            .context("Missing viewer login")?
            .to_string();
        debug!(login = %login, "Fetched viewer");
        Ok(login)
    }

    async fn list_orgs(&self, user: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut orgs = Vec::new();
        let mut page = 1u32;

        loop {
            let page_str = page.to_string();
            let data = self
                .get_with_retry(
                    &format!("/users/{user}/orgs"),
                    &[("per_page", "100"), ("page", &page_str)],
                    cancel,
                )
                .await?;
            let nodes = data.as_array().context("Missing organization list")?;
            orgs.extend(
                nodes
                    .iter()
                    .filter_map(|o| o["login"].as_str().map(|s| s.to_string())),
            );
            if nodes.len() < 100 {
                break;
            }
            page += 1;
        }

        info!(user = user, count = orgs.len(), "Discovered user organizations");
        Ok(orgs)
    }

    async fn search_snapshot(&self, user: &str, cancel: &CancellationToken) -> Result<Snapshot> {
        let involves_query = format!("is:open is:pr involves:{} archived:false", user);
        let unreviewed_query = format!("is:open is:pr user:{} review:none archived:false", user);

        let (involves, unreviewed) = tokio::join!(
            self.search_prs(&involves_query, cancel),
            self.search_prs(&unreviewed_query, cancel),
        );

        let (involves, unreviewed) = match (involves, unreviewed) {
            (Err(a), Err(b)) => bail!("All GitHub queries failed: {a:#}; {b:#}"),
            (Ok(a), Err(e)) => {
                warn!(query = %unreviewed_query, error = %e, "Query failed, continuing with partial results");
                (a, Vec::new())
            }
            (Err(e), Ok(b)) => {
                warn!(query = %involves_query, error = %e, "Query failed, continuing with partial results");
                (Vec::new(), b)
            }
            (Ok(a), Ok(b)) => (a, b),
        };

        let snapshot = merge_search_results(user, [involves, unreviewed], self.max_prs);
        info!(
            incoming = snapshot.incoming.len(),
            outgoing = snapshot.outgoing.len(),
            "GitHub PR summary"
        );
        Ok(snapshot)
    }
}

/// One PR as returned by the search collaborator.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub repository: String,
    pub number: u32,
    pub title: String,
    pub author: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub is_draft: bool,
}

/// Merges query results by URL. A URL seen in a later batch replaces the
/// earlier record in place; direction is outgoing iff `user` authored it.
pub fn merge_search_results<I>(user: &str, batches: I, max_prs: usize) -> Snapshot
where
    I: IntoIterator<Item = Vec<SearchHit>>,
{
    let mut order: Vec<SearchHit> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for hit in batches.into_iter().flatten() {
        match index.get(&hit.url) {
            Some(&i) => order[i] = hit,
            None => {
                index.insert(hit.url.clone(), order.len());
                order.push(hit);
            }
        }
    }

    if order.len() > max_prs {
        info!(limit = max_prs, total = order.len(), "Limiting PRs for performance");
        order.truncate(max_prs);
    }

    let mut snapshot = Snapshot::default();
    for hit in order {
        let direction = if hit.author == user {
            Direction::Outgoing
        } else {
            Direction::Incoming
        };
        let pr = PullRequest {
            url: hit.url,
            repository: hit.repository,
            number: hit.number,
            title: hit.title,
            author: hit.author,
            updated_at: hit.updated_at,
            is_draft: hit.is_draft,
            direction,
            flags: BlockingFlags::default(),
        };
        match direction {
            Direction::Outgoing => snapshot.outgoing.push(pr),
            Direction::Incoming => snapshot.incoming.push(pr),
        }
    }
    snapshot
}

/// Parses one item of the issue search API; non-PR issues yield `None`.
pub fn parse_search_hit(node: &Value) -> Option<SearchHit> {
    node.get("pull_request")?;
    let url = node["html_url"].as_str()?.to_string();

    // .../repos/{owner}/{name}
    let repo_url = node["repository_url"].as_str().unwrap_or("");
    let mut tail = repo_url.rsplit('/');
    let name = tail.next().unwrap_or("");
    let owner = tail.next().unwrap_or("");

    Some(SearchHit {
        url,
        repository: format!("{owner}/{name}"),
        number: node["number"].as_u64().unwrap_or(0) as u32,
        title: node["title"].as_str().unwrap_or("").to_string(),
        author: node["user"]["login"]
            .as_str()
            .unwrap_or("ghost")
            .to_string(),
        updated_at: node["updated_at"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
        is_draft: node["draft"].as_bool().unwrap_or(false),
    })
}
