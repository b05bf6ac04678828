//! Jira HTTP client.
//!
//! Wraps the Jira Cloud REST API v3 for the issue operations the pipeline
//! needs: parent issues, sub-tasks, name-resolved transitions, and
//! document-format comments.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{IssueFields, IssueSummary, IssueTrackerConfig};
use crate::domain::ports::IssueTracker;

#[derive(Debug, Deserialize)]
struct CreatedIssueResponse {
    key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    issues: Vec<SearchIssue>,
}

#[derive(Debug, Deserialize)]
struct SearchIssue {
    key: String,
    fields: SearchIssueFields,
}

#[derive(Debug, Deserialize)]
struct SearchIssueFields {
    summary: String,
    status: StatusField,
}

#[derive(Debug, Deserialize)]
struct StatusField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TransitionsResponse {
    transitions: Vec<TransitionEntry>,
}

#[derive(Debug, Deserialize)]
struct TransitionEntry {
    id: String,
    name: String,
}

/// Atlassian document format wrapper for plain-paragraph bodies.
fn adf_document(body: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "doc",
        "version": 1,
        "content": [{
            "type": "paragraph",
            "content": [{ "type": "text", "text": body }]
        }]
    })
}

/// HTTP client for the Jira Cloud REST API v3.
#[derive(Debug, Clone)]
pub struct JiraClient {
    http: Client,
    base_url: String,
    email: String,
    api_token: String,
    project_key: String,
}

impl JiraClient {
    pub fn new(config: &IssueTrackerConfig) -> DomainResult<Self> {
        if config.base_url.is_empty() || config.api_token.is_empty() {
            return Err(DomainError::NotConfigured("issue_tracker"));
        }
        Ok(Self {
            http: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            api_token: config.api_token.clone(),
            project_key: config.project_key.clone(),
        })
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/rest/api/3{}", self.base_url, tail)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json")
    }

    async fn check(resp: reqwest::Response, what: &str) -> DomainResult<reqwest::Response> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::ExternalCallFailed(format!(
                "Jira {what} returned {status}: {body}"
            )));
        }
        Ok(resp)
    }

    async fn create(&self, fields: serde_json::Value, what: &str) -> DomainResult<String> {
        let resp = self
            .request(reqwest::Method::POST, &self.url("/issue"))
            .json(&serde_json::json!({ "fields": fields }))
            .send()
            .await
            .map_err(|e| DomainError::ExternalCallFailed(format!("Jira {what} request failed: {e}")))?;
        let resp = Self::check(resp, what).await?;
        let created: CreatedIssueResponse = resp
            .json()
            .await
            .map_err(|e| DomainError::ExternalCallFailed(format!("Jira {what} parse failed: {e}")))?;
        Ok(created.key)
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn create_issue(&self, fields: &IssueFields) -> DomainResult<String> {
        self.create(
            serde_json::json!({
                "project": { "key": self.project_key },
                "summary": fields.summary,
                "description": adf_document(&fields.description),
                "issuetype": { "name": fields.issue_type },
            }),
            "create_issue",
        )
        .await
    }

    async fn create_sub_task(
        &self,
        parent_key: &str,
        fields: &IssueFields,
    ) -> DomainResult<String> {
        // The sub-task type is forced regardless of what the caller set.
        self.create(
            serde_json::json!({
                "project": { "key": self.project_key },
                "parent": { "key": parent_key },
                "summary": fields.summary,
                "description": adf_document(&fields.description),
                "issuetype": { "name": "Sub-task" },
            }),
            "create_sub_task",
        )
        .await
    }

    async fn get_sub_tasks(&self, parent_key: &str) -> DomainResult<Vec<IssueSummary>> {
        let jql = format!("parent = {parent_key}");
        let url = self.url(&format!(
            "/search?jql={}&fields=summary,status",
            urlencode(&jql)
        ));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!("Jira get_sub_tasks request failed: {e}"))
            })?;
        let resp = Self::check(resp, "get_sub_tasks").await?;
        let search: SearchResponse = resp.json().await.map_err(|e| {
            DomainError::ExternalCallFailed(format!("Jira get_sub_tasks parse failed: {e}"))
        })?;
        Ok(search
            .issues
            .into_iter()
            .map(|i| IssueSummary {
                key: i.key,
                summary: i.fields.summary,
                status: i.fields.status.name,
            })
            .collect())
    }

    async fn transition(&self, issue_key: &str, transition_name: &str) -> DomainResult<()> {
        let url = self.url(&format!("/issue/{issue_key}/transitions"));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!("Jira transitions request failed: {e}"))
            })?;
        let resp = Self::check(resp, "transitions").await?;
        let available: TransitionsResponse = resp.json().await.map_err(|e| {
            DomainError::ExternalCallFailed(format!("Jira transitions parse failed: {e}"))
        })?;

        let id = available
            .transitions
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(transition_name))
            .map(|t| t.id.clone())
            .ok_or_else(|| {
                DomainError::ExternalCallFailed(format!(
                    "Jira issue {issue_key} has no transition named '{transition_name}'"
                ))
            })?;

        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&serde_json::json!({ "transition": { "id": id } }))
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!("Jira transition post failed: {e}"))
            })?;
        Self::check(resp, "transition").await?;
        Ok(())
    }

    async fn add_comment(&self, issue_key: &str, body: &str) -> DomainResult<()> {
        let url = self.url(&format!("/issue/{issue_key}/comment"));
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&serde_json::json!({ "body": adf_document(body) }))
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!("Jira add_comment request failed: {e}"))
            })?;
        Self::check(resp, "add_comment").await?;
        Ok(())
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adf_document_wraps_paragraph() {
        let doc = adf_document("hello");
        assert_eq!(doc["type"], "doc");
        assert_eq!(doc["content"][0]["type"], "paragraph");
        assert_eq!(doc["content"][0]["content"][0]["text"], "hello");
    }

    #[test]
    fn jql_is_urlencoded() {
        assert_eq!(urlencode("parent = TOS-39"), "parent%20%3D%20TOS-39");
    }

    #[test]
    fn unconfigured_client_is_rejected() {
        let err = JiraClient::new(&IssueTrackerConfig::default());
        assert!(matches!(err, Err(DomainError::NotConfigured(_))));
    }
}
