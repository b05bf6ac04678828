//! HTTP clients for the external collaborators.

pub mod chat;
pub mod doc_store;
pub mod issue_tracker;
pub mod source_control;
pub mod unconfigured;

pub use chat::SlackClient;
pub use doc_store::ConfluenceClient;
pub use issue_tracker::JiraClient;
pub use source_control::GitHubClient;
pub use unconfigured::{UnconfiguredDocStore, UnconfiguredIssueTracker, UnconfiguredSourceControl};
