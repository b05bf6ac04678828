//! GitHub HTTP client with rate limiting.
//!
//! Wraps the GitHub REST API v3, providing typed methods for the
//! operations the route handlers need. Includes a token-bucket rate
//! limiter to stay within the 5 000 req/hour authenticated API limit.
//! Getter methods map 404 to `None`; other errors propagate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{PullRequest, SourceControlConfig};
use crate::domain::ports::SourceControl;

const GITHUB_API_BASE: &str = "https://api.github.com";

/// Token-bucket rate limiter.
///
/// Allows up to `capacity` requests per `window`. When the bucket is
/// exhausted, [`acquire`](RateLimiter::acquire) sleeps until the window
/// resets and a token becomes available.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    tokens: u32,
    window: Duration,
    window_start: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            tokens: capacity,
            window,
            window_start: Instant::now(),
        }
    }

    /// Acquire a single token, sleeping if necessary.
    pub async fn acquire(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed >= self.window {
            self.tokens = self.capacity;
            self.window_start = Instant::now();
        }

        if self.tokens > 0 {
            self.tokens -= 1;
        } else {
            let remaining = self.window.saturating_sub(elapsed);
            tracing::warn!(
                sleep_ms = remaining.as_millis() as u64,
                "GitHub rate limit reached, sleeping"
            );
            tokio::time::sleep(remaining).await;
            self.tokens = self.capacity - 1;
            self.window_start = Instant::now();
        }
    }
}

#[derive(Debug, Deserialize)]
struct PrResponse {
    number: i64,
    title: String,
    #[serde(default)]
    merged: bool,
    html_url: String,
    head: BranchRef,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    #[serde(rename = "ref")]
    branch: String,
}

#[derive(Debug, Deserialize)]
struct ReviewCommentResponse {
    body: String,
}

#[derive(Debug, Deserialize)]
struct CheckRunResponse {
    output: Option<CheckRunOutput>,
}

#[derive(Debug, Deserialize)]
struct CheckRunOutput {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl From<PrResponse> for PullRequest {
    fn from(pr: PrResponse) -> Self {
        PullRequest {
            number: pr.number,
            branch: pr.head.branch,
            title: pr.title,
            merged: pr.merged,
            url: pr.html_url,
        }
    }
}

/// HTTP client for the GitHub REST API v3.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    token: String,
    owner: String,
    repo: String,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GitHubClient {
    pub fn new(config: &SourceControlConfig) -> DomainResult<Self> {
        if config.token.is_empty() {
            return Err(DomainError::NotConfigured("source_control.token"));
        }
        if config.owner.is_empty() || config.repo.is_empty() {
            return Err(DomainError::NotConfigured("source_control.owner/repo"));
        }
        // 5 000 authenticated requests per hour.
        let rate_limiter = RateLimiter::new(5_000, Duration::from_secs(3_600));
        Ok(Self {
            http: Client::new(),
            token: config.token.clone(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            rate_limiter: Arc::new(Mutex::new(rate_limiter)),
        })
    }

    async fn rate_limited_request(
        &self,
        method: reqwest::Method,
        url: &str,
    ) -> reqwest::RequestBuilder {
        self.rate_limiter.lock().await.acquire().await;
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "maestro-orchestrator")
    }

    fn repo_url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}{}", GITHUB_API_BASE, self.owner, self.repo, tail)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> DomainResult<Option<T>> {
        let resp = self
            .rate_limited_request(reqwest::Method::GET, url)
            .await
            .send()
            .await
            .map_err(|e| DomainError::ExternalCallFailed(format!("GitHub {what} request failed: {e}")))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::ExternalCallFailed(format!(
                "GitHub {what} returned {status}: {body}"
            )));
        }
        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| DomainError::ExternalCallFailed(format!("GitHub {what} parse failed: {e}")))
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    async fn get_pr(&self, number: i64) -> DomainResult<Option<PullRequest>> {
        let url = self.repo_url(&format!("/pulls/{number}"));
        Ok(self
            .get_json::<PrResponse>(&url, "get_pr")
            .await?
            .map(PullRequest::from))
    }

    async fn find_pr(&self, branch: &str) -> DomainResult<Option<PullRequest>> {
        let url = self.repo_url(&format!("/pulls?head={}:{}&state=all", self.owner, branch));
        let prs: Option<Vec<PrResponse>> = self.get_json(&url, "find_pr").await?;
        Ok(prs
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(PullRequest::from))
    }

    async fn merge_pr(&self, number: i64) -> DomainResult<()> {
        let url = self.repo_url(&format!("/pulls/{number}/merge"));
        let resp = self
            .rate_limited_request(reqwest::Method::PUT, &url)
            .await
            .json(&serde_json::json!({ "merge_method": "squash" }))
            .send()
            .await
            .map_err(|e| DomainError::ExternalCallFailed(format!("GitHub merge_pr request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::ExternalCallFailed(format!(
                "GitHub merge_pr returned {status}: {body}"
            )));
        }
        Ok(())
    }

    async fn get_pr_review_comments(&self, number: i64) -> DomainResult<Vec<String>> {
        let url = self.repo_url(&format!("/pulls/{number}/comments?per_page=100"));
        let comments: Option<Vec<ReviewCommentResponse>> =
            self.get_json(&url, "get_pr_review_comments").await?;
        Ok(comments
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.body)
            .collect())
    }

    async fn get_check_run_logs(&self, run_id: i64) -> DomainResult<Option<String>> {
        let url = self.repo_url(&format!("/check-runs/{run_id}"));
        let run: Option<CheckRunResponse> = self.get_json(&url, "get_check_run_logs").await?;
        Ok(run.map(|r| {
            let output = r.output.unwrap_or(CheckRunOutput {
                summary: None,
                text: None,
            });
            let mut logs = output.summary.unwrap_or_default();
            if let Some(text) = output.text {
                if !logs.is_empty() {
                    logs.push('\n');
                }
                logs.push_str(&text);
            }
            logs
        }))
    }

    async fn get_pr_branch(&self, number: i64) -> DomainResult<Option<String>> {
        Ok(self.get_pr(number).await?.map(|pr| pr.branch))
    }
}
