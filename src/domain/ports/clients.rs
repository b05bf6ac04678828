//! Ports for the four external collaborators.
//!
//! Thin contracts only — retry policy, idempotency guards, and state
//! transitions belong to the route handlers, not the clients.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{IssueFields, IssueSummary, Page, PageComment, PullRequest};

#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Returns the created issue key.
    async fn create_issue(&self, fields: &IssueFields) -> DomainResult<String>;

    /// Always forces the sub-task issue type. Returns the created key.
    async fn create_sub_task(&self, parent_key: &str, fields: &IssueFields)
        -> DomainResult<String>;

    async fn get_sub_tasks(&self, parent_key: &str) -> DomainResult<Vec<IssueSummary>>;

    /// Resolves the transition by case-insensitive name, then posts by id.
    /// Fails when no transition of that name is available.
    async fn transition(&self, issue_key: &str, transition_name: &str) -> DomainResult<()>;

    async fn add_comment(&self, issue_key: &str, body: &str) -> DomainResult<()>;
}

#[async_trait]
pub trait DocStore: Send + Sync {
    async fn create_page(
        &self,
        title: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> DomainResult<Page>;

    async fn update_page(
        &self,
        page_id: &str,
        title: &str,
        body: &str,
        version: u32,
    ) -> DomainResult<()>;

    async fn find_page(&self, title: &str) -> DomainResult<Option<Page>>;

    async fn get_content_state(&self, page_id: &str) -> DomainResult<Option<String>>;

    async fn set_content_state(&self, page_id: &str, key: &str, value: &str) -> DomainResult<()>;

    async fn get_pages_in_review(&self) -> DomainResult<Vec<Page>>;

    /// Footer and inline comments merged, filtered to `created_at > since`
    /// (strict).
    async fn get_new_comments(
        &self,
        page_id: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<PageComment>>;
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// 404 → `None`.
    async fn get_pr(&self, number: i64) -> DomainResult<Option<PullRequest>>;

    /// 404 / no match → `None`.
    async fn find_pr(&self, branch: &str) -> DomainResult<Option<PullRequest>>;

    /// Squash merge.
    async fn merge_pr(&self, number: i64) -> DomainResult<()>;

    async fn get_pr_review_comments(&self, number: i64) -> DomainResult<Vec<String>>;

    /// 404 → `None`.
    async fn get_check_run_logs(&self, run_id: i64) -> DomainResult<Option<String>>;

    /// 404 → `None`.
    async fn get_pr_branch(&self, number: i64) -> DomainResult<Option<String>>;
}

#[async_trait]
pub trait ChatNotifier: Send + Sync {
    /// Post via the incoming webhook.
    async fn send(&self, text: &str, thread_ts: Option<&str>) -> DomainResult<()>;

    /// Post via the API, optionally threaded.
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> DomainResult<()>;

    /// Display-name resolution with fallbacks; never fails past the
    /// user id itself.
    async fn get_user_name(&self, user_id: &str) -> DomainResult<String>;
}
