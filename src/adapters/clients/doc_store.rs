//! Confluence HTTP client.
//!
//! Wraps the Confluence Cloud v2 API for page publication, content-state
//! coordination, and the comment feed the polling bridge consumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{DocStoreConfig, Page, PageComment};
use crate::domain::ports::DocStore;

#[derive(Debug, Deserialize)]
struct PageResponse {
    id: String,
    title: String,
    version: VersionField,
}

#[derive(Debug, Deserialize)]
struct VersionField {
    number: u32,
}

#[derive(Debug, Deserialize)]
struct PageListResponse {
    results: Vec<PageResponse>,
}

#[derive(Debug, Deserialize)]
struct ContentStateResponse {
    #[serde(rename = "contentState")]
    content_state: Option<ContentStateField>,
}

#[derive(Debug, Deserialize)]
struct ContentStateField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CommentListResponse {
    results: Vec<CommentResponse>,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    body: CommentBody,
    #[serde(default)]
    version: Option<CommentVersion>,
    #[serde(default)]
    author: Option<CommentAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommentBody {
    storage: Option<StorageValue>,
}

#[derive(Debug, Deserialize)]
struct StorageValue {
    value: String,
}

#[derive(Debug, Deserialize)]
struct CommentVersion {
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentAuthor {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(rename = "publicName")]
    public_name: Option<String>,
    #[serde(rename = "accountId")]
    account_id: Option<String>,
}

impl CommentAuthor {
    /// Display-name resolution with fallbacks.
    fn resolve_name(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.public_name.clone())
            .or_else(|| self.account_id.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl From<PageResponse> for Page {
    fn from(p: PageResponse) -> Self {
        Page {
            id: p.id,
            title: p.title,
            version: p.version.number,
        }
    }
}

/// HTTP client for the Confluence Cloud v2 API.
#[derive(Debug, Clone)]
pub struct ConfluenceClient {
    http: Client,
    base_url: String,
    api_token: String,
    space_id: String,
}

impl ConfluenceClient {
    pub fn new(config: &DocStoreConfig) -> DomainResult<Self> {
        if config.base_url.is_empty() || config.api_token.is_empty() {
            return Err(DomainError::NotConfigured("doc_store"));
        }
        Ok(Self {
            http: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            space_id: config.space_id.clone(),
        })
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/wiki/api/v2{}", self.base_url, tail)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Accept", "application/json")
    }

    async fn check(resp: reqwest::Response, what: &str) -> DomainResult<reqwest::Response> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::ExternalCallFailed(format!(
                "Confluence {what} returned {status}: {body}"
            )));
        }
        Ok(resp)
    }

    async fn fetch_comments(&self, url: &str, what: &str) -> DomainResult<Vec<CommentResponse>> {
        let resp = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!("Confluence {what} request failed: {e}"))
            })?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let resp = Self::check(resp, what).await?;
        let list: CommentListResponse = resp.json().await.map_err(|e| {
            DomainError::ExternalCallFailed(format!("Confluence {what} parse failed: {e}"))
        })?;
        Ok(list.results)
    }
}

#[async_trait]
impl DocStore for ConfluenceClient {
    async fn create_page(
        &self,
        title: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> DomainResult<Page> {
        let mut payload = serde_json::json!({
            "spaceId": self.space_id,
            "status": "current",
            "title": title,
            "body": { "representation": "storage", "value": body },
        });
        if let Some(parent) = parent_id {
            payload["parentId"] = serde_json::json!(parent);
        }

        let resp = self
            .request(reqwest::Method::POST, &self.url("/pages"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!("Confluence create_page request failed: {e}"))
            })?;
        let resp = Self::check(resp, "create_page").await?;
        let page: PageResponse = resp.json().await.map_err(|e| {
            DomainError::ExternalCallFailed(format!("Confluence create_page parse failed: {e}"))
        })?;
        Ok(page.into())
    }

    async fn update_page(
        &self,
        page_id: &str,
        title: &str,
        body: &str,
        version: u32,
    ) -> DomainResult<()> {
        let payload = serde_json::json!({
            "id": page_id,
            "status": "current",
            "title": title,
            "body": { "representation": "storage", "value": body },
            "version": { "number": version },
        });

        let resp = self
            .request(reqwest::Method::PUT, &self.url(&format!("/pages/{page_id}")))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!("Confluence update_page request failed: {e}"))
            })?;
        Self::check(resp, "update_page").await?;
        Ok(())
    }

    async fn find_page(&self, title: &str) -> DomainResult<Option<Page>> {
        let url = self.url(&format!(
            "/pages?space-id={}&title={}",
            self.space_id,
            urlencoding(title)
        ));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!("Confluence find_page request failed: {e}"))
            })?;
        let resp = Self::check(resp, "find_page").await?;
        let list: PageListResponse = resp.json().await.map_err(|e| {
            DomainError::ExternalCallFailed(format!("Confluence find_page parse failed: {e}"))
        })?;
        Ok(list.results.into_iter().next().map(Page::from))
    }

    async fn get_content_state(&self, page_id: &str) -> DomainResult<Option<String>> {
        let url = self.url(&format!("/pages/{page_id}/content-states"));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!(
                    "Confluence get_content_state request failed: {e}"
                ))
            })?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp, "get_content_state").await?;
        let state: ContentStateResponse = resp.json().await.map_err(|e| {
            DomainError::ExternalCallFailed(format!(
                "Confluence get_content_state parse failed: {e}"
            ))
        })?;
        Ok(state.content_state.map(|s| s.name))
    }

    async fn set_content_state(&self, page_id: &str, key: &str, value: &str) -> DomainResult<()> {
        let url = self.url(&format!("/pages/{page_id}/content-states"));
        let payload = serde_json::json!({ "key": key, "name": value });

        // Try update first; fall back to create when the state does not
        // exist yet.
        let resp = self
            .request(reqwest::Method::PUT, &url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!(
                    "Confluence set_content_state request failed: {e}"
                ))
            })?;
        if resp.status() == StatusCode::NOT_FOUND {
            let resp = self
                .request(reqwest::Method::POST, &url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| {
                    DomainError::ExternalCallFailed(format!(
                        "Confluence set_content_state fallback failed: {e}"
                    ))
                })?;
            Self::check(resp, "set_content_state").await?;
            return Ok(());
        }
        Self::check(resp, "set_content_state").await?;
        Ok(())
    }

    async fn get_pages_in_review(&self) -> DomainResult<Vec<Page>> {
        let url = self.url(&format!(
            "/pages?space-id={}&content-state=In%20Review",
            self.space_id
        ));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!(
                    "Confluence get_pages_in_review request failed: {e}"
                ))
            })?;
        let resp = Self::check(resp, "get_pages_in_review").await?;
        let list: PageListResponse = resp.json().await.map_err(|e| {
            DomainError::ExternalCallFailed(format!(
                "Confluence get_pages_in_review parse failed: {e}"
            ))
        })?;
        Ok(list.results.into_iter().map(Page::from).collect())
    }

    async fn get_new_comments(
        &self,
        page_id: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<PageComment>> {
        let footer = self
            .fetch_comments(
                &self.url(&format!("/pages/{page_id}/footer-comments?body-format=storage")),
                "footer_comments",
            )
            .await?;
        let inline = self
            .fetch_comments(
                &self.url(&format!("/pages/{page_id}/inline-comments?body-format=storage")),
                "inline_comments",
            )
            .await?;

        let mut comments: Vec<PageComment> = footer
            .into_iter()
            .chain(inline)
            .filter_map(|c| {
                let created_at = c
                    .version
                    .as_ref()
                    .and_then(|v| v.created_at.as_deref())
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))?;
                let body = c.body.storage.as_ref().map(|s| s.value.clone())?;
                let author = c
                    .author
                    .as_ref()
                    .map(CommentAuthor::resolve_name)
                    .unwrap_or_else(|| "unknown".to_string());
                Some(PageComment {
                    body,
                    author,
                    created_at,
                })
            })
            // Strictly greater: a comment created exactly at the watermark
            // was seen by the previous tick.
            .filter(|c| c.created_at > since)
            .collect();

        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }
}

fn urlencoding(s: &str) -> String {
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
