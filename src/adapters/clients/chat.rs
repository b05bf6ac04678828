//! Slack HTTP client.
//!
//! Two send paths: the incoming webhook for simple notifications and the
//! Web API (`chat.postMessage`) for channel- and thread-targeted replies.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ChatConfig;
use crate::domain::ports::ChatNotifier;

const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<UserObject>,
}

#[derive(Debug, Deserialize)]
struct UserObject {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

/// HTTP client for Slack.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http: Client,
    webhook_url: String,
    bot_token: String,
}

impl SlackClient {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            http: Client::new(),
            webhook_url: config.webhook_url.clone(),
            bot_token: config.bot_token.clone(),
        }
    }

    fn non_empty(s: &str) -> Option<&str> {
        let t = s.trim();
        (!t.is_empty()).then_some(t)
    }
}

#[async_trait]
impl ChatNotifier for SlackClient {
    async fn send(&self, text: &str, thread_ts: Option<&str>) -> DomainResult<()> {
        if self.webhook_url.is_empty() {
            return Err(DomainError::NotConfigured("chat.webhook_url"));
        }
        let mut payload = serde_json::json!({ "text": text });
        if let Some(ts) = thread_ts {
            payload["thread_ts"] = serde_json::json!(ts);
        }

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DomainError::ExternalCallFailed(format!("Slack webhook send failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(DomainError::ExternalCallFailed(format!(
                "Slack webhook returned {status}"
            )));
        }
        Ok(())
    }

    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> DomainResult<()> {
        if self.bot_token.is_empty() {
            return Err(DomainError::NotConfigured("chat.bot_token"));
        }
        let mut payload = serde_json::json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            payload["thread_ts"] = serde_json::json!(ts);
        }

        let resp = self
            .http
            .post(format!("{SLACK_API_BASE}/chat.postMessage"))
            .header("Authorization", format!("Bearer {}", self.bot_token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!("Slack postMessage failed: {e}"))
            })?;
        let api: ApiResponse = resp.json().await.map_err(|e| {
            DomainError::ExternalCallFailed(format!("Slack postMessage parse failed: {e}"))
        })?;
        if !api.ok {
            return Err(DomainError::ExternalCallFailed(format!(
                "Slack postMessage rejected: {}",
                api.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        Ok(())
    }

    async fn get_user_name(&self, user_id: &str) -> DomainResult<String> {
        if self.bot_token.is_empty() {
            return Err(DomainError::NotConfigured("chat.bot_token"));
        }
        let resp = self
            .http
            .get(format!("{SLACK_API_BASE}/users.info"))
            .header("Authorization", format!("Bearer {}", self.bot_token))
            .query(&[("user", user_id)])
            .send()
            .await
            .map_err(|e| DomainError::ExternalCallFailed(format!("Slack users.info failed: {e}")))?;
        let info: UserInfoResponse = resp.json().await.map_err(|e| {
            DomainError::ExternalCallFailed(format!("Slack users.info parse failed: {e}"))
        })?;

        if !info.ok {
            tracing::warn!(
                user_id,
                error = info.error.as_deref().unwrap_or("unknown"),
                "users.info rejected, falling back to user id"
            );
            return Ok(user_id.to_string());
        }

        // profile.display_name → profile.real_name → user.real_name →
        // user.name → user id
        let name = info.user.and_then(|u| {
            let profile = u.profile;
            profile
                .as_ref()
                .and_then(|p| p.display_name.as_deref().and_then(Self::non_empty))
                .or_else(|| {
                    profile
                        .as_ref()
                        .and_then(|p| p.real_name.as_deref().and_then(Self::non_empty))
                })
                .or_else(|| u.real_name.as_deref().and_then(Self::non_empty))
                .or_else(|| u.name.as_deref().and_then(Self::non_empty))
                .map(String::from)
        });
        Ok(name.unwrap_or_else(|| user_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_without_webhook_is_not_configured() {
        let client = SlackClient::new(&ChatConfig::default());
        let err = client.send("hello", None).await;
        assert!(matches!(err, Err(DomainError::NotConfigured(_))));
    }

    #[test]
    fn blank_names_are_skipped_in_fallback() {
        assert_eq!(SlackClient::non_empty("  "), None);
        assert_eq!(SlackClient::non_empty("Ada"), Some("Ada"));
    }
}
