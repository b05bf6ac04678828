//! Shapes exchanged with the external collaborators.
//!
//! These are the orchestrator-side views of chat, document-store, issue
//! tracker, and source-control objects; the REST clients translate wire
//! payloads into them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document-store page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub version: u32,
}

/// A comment on a document-store page, footer or inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageComment {
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// A source-control pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: i64,
    pub branch: String,
    pub title: String,
    pub merged: bool,
    pub url: String,
}

/// Fields for creating an issue or sub-task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueFields {
    pub summary: String,
    pub description: String,
    /// Issue-tracker type name; ignored on sub-task creation, which always
    /// forces the sub-task type.
    pub issue_type: String,
}

impl IssueFields {
    pub fn new(summary: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            description: description.into(),
            issue_type: "Task".to_string(),
        }
    }
}

/// Summary view of an existing issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSummary {
    pub key: String,
    pub summary: String,
    pub status: String,
}
