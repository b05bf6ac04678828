//! Null clients for integrations without credentials.
//!
//! Startup must succeed with no secrets at all; the error surfaces only
//! when a route actually needs the missing integration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{IssueFields, IssueSummary, Page, PageComment, PullRequest};
use crate::domain::ports::{DocStore, IssueTracker, SourceControl};

pub struct UnconfiguredSourceControl;

#[async_trait]
impl SourceControl for UnconfiguredSourceControl {
    async fn get_pr(&self, _number: i64) -> DomainResult<Option<PullRequest>> {
        Err(DomainError::NotConfigured("source_control"))
    }

    async fn find_pr(&self, _branch: &str) -> DomainResult<Option<PullRequest>> {
        Err(DomainError::NotConfigured("source_control"))
    }

    async fn merge_pr(&self, _number: i64) -> DomainResult<()> {
        Err(DomainError::NotConfigured("source_control"))
    }

    async fn get_pr_review_comments(&self, _number: i64) -> DomainResult<Vec<String>> {
        Err(DomainError::NotConfigured("source_control"))
    }

    async fn get_check_run_logs(&self, _run_id: i64) -> DomainResult<Option<String>> {
        Err(DomainError::NotConfigured("source_control"))
    }

    async fn get_pr_branch(&self, _number: i64) -> DomainResult<Option<String>> {
        Err(DomainError::NotConfigured("source_control"))
    }
}

pub struct UnconfiguredIssueTracker;

#[async_trait]
impl IssueTracker for UnconfiguredIssueTracker {
    async fn create_issue(&self, _fields: &IssueFields) -> DomainResult<String> {
        Err(DomainError::NotConfigured("issue_tracker"))
    }

    async fn create_sub_task(
        &self,
        _parent_key: &str,
        _fields: &IssueFields,
    ) -> DomainResult<String> {
        Err(DomainError::NotConfigured("issue_tracker"))
    }

    async fn get_sub_tasks(&self, _parent_key: &str) -> DomainResult<Vec<IssueSummary>> {
        Err(DomainError::NotConfigured("issue_tracker"))
    }

    async fn transition(&self, _issue_key: &str, _transition_name: &str) -> DomainResult<()> {
        Err(DomainError::NotConfigured("issue_tracker"))
    }

    async fn add_comment(&self, _issue_key: &str, _body: &str) -> DomainResult<()> {
        Err(DomainError::NotConfigured("issue_tracker"))
    }
}

pub struct UnconfiguredDocStore;

#[async_trait]
impl DocStore for UnconfiguredDocStore {
    async fn create_page(
        &self,
        _title: &str,
        _body: &str,
        _parent_id: Option<&str>,
    ) -> DomainResult<Page> {
        Err(DomainError::NotConfigured("doc_store"))
    }

    async fn update_page(
        &self,
        _page_id: &str,
        _title: &str,
        _body: &str,
        _version: u32,
    ) -> DomainResult<()> {
        Err(DomainError::NotConfigured("doc_store"))
    }

    async fn find_page(&self, _title: &str) -> DomainResult<Option<Page>> {
        Err(DomainError::NotConfigured("doc_store"))
    }

    async fn get_content_state(&self, _page_id: &str) -> DomainResult<Option<String>> {
        Err(DomainError::NotConfigured("doc_store"))
    }

    async fn set_content_state(
        &self,
        _page_id: &str,
        _key: &str,
        _value: &str,
    ) -> DomainResult<()> {
        Err(DomainError::NotConfigured("doc_store"))
    }

    async fn get_pages_in_review(&self) -> DomainResult<Vec<Page>> {
        Err(DomainError::NotConfigured("doc_store"))
    }

    async fn get_new_comments(
        &self,
        _page_id: &str,
        _since: DateTime<Utc>,
    ) -> DomainResult<Vec<PageComment>> {
        Err(DomainError::NotConfigured("doc_store"))
    }
}
