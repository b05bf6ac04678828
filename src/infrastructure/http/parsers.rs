//! Webhook payload parsing.
//!
//! Parsers are pure over their input: they turn a verified request body
//! into zero or more domain events and never touch state. Each parser
//! owns its identifier extraction.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::domain::models::OrchestratorEvent;

fn issue_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:feature|fix|chore)/([a-z][a-z0-9]*-\d+)(?:-|$)").expect("static regex")
    })
}

/// Issue key from a branch name: `feature/tos-40-payments` → `TOS-40`.
/// Branches outside the convention yield `None`.
pub fn extract_issue_key(branch: &str) -> Option<String> {
    issue_key_re()
        .captures(branch)
        .map(|caps| caps[1].to_uppercase())
}

// ---------------------------------------------------------------------------
// Chat (Slack)
// ---------------------------------------------------------------------------

/// Parse a chat event payload.
///
/// Only `event_callback` envelopes holding non-bot `message` events
/// produce work; everything else (including the `url_verification`
/// handshake, which the endpoint answers directly) is empty.
pub fn parse_slack(payload: &Value) -> Vec<OrchestratorEvent> {
    if payload.get("type").and_then(Value::as_str) != Some("event_callback") {
        return Vec::new();
    }
    let Some(event) = payload.get("event") else {
        return Vec::new();
    };
    if event.get("type").and_then(Value::as_str) != Some("message") {
        return Vec::new();
    }

    // Bot traffic is filtered out so the orchestrator never answers itself.
    if event.get("bot_id").is_some() {
        return Vec::new();
    }
    if event.get("subtype").and_then(Value::as_str) == Some("bot_message") {
        return Vec::new();
    }

    let (Some(text), Some(user), Some(channel)) = (
        event.get("text").and_then(Value::as_str),
        event.get("user").and_then(Value::as_str),
        event.get("channel").and_then(Value::as_str),
    ) else {
        return Vec::new();
    };

    // Replies thread under the original message.
    let thread_ts = event
        .get("thread_ts")
        .or_else(|| event.get("ts"))
        .and_then(Value::as_str)
        .map(String::from);

    vec![OrchestratorEvent::TaskRequested {
        message: text.to_string(),
        sender_id: user.to_string(),
        sender_name: user.to_string(),
        channel: channel.to_string(),
        thread_ts,
    }]
}

// ---------------------------------------------------------------------------
// Source control (GitHub)
// ---------------------------------------------------------------------------

/// Parse a source-control webhook, keyed by the event-type header.
pub fn parse_github(event_type: &str, payload: &Value) -> Vec<OrchestratorEvent> {
    match event_type {
        "check_suite" => parse_check_suite(payload),
        "pull_request_review" => parse_pull_request_review(payload),
        "pull_request" => parse_pull_request(payload),
        "issue_comment" => parse_issue_comment(payload),
        _ => Vec::new(),
    }
}

fn pr_refs(suite: &Value) -> Vec<(i64, String)> {
    suite
        .get("pull_requests")
        .and_then(Value::as_array)
        .map(|prs| {
            prs.iter()
                .filter_map(|pr| {
                    let number = pr.get("number").and_then(Value::as_i64)?;
                    let branch = pr
                        .pointer("/head/ref")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    Some((number, branch))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_check_suite(payload: &Value) -> Vec<OrchestratorEvent> {
    let Some(suite) = payload.get("check_suite") else {
        return Vec::new();
    };
    let conclusion = suite.get("conclusion").and_then(Value::as_str);
    let check_run_id = suite.get("id").and_then(Value::as_i64);

    match conclusion {
        Some("failure") | Some("timed_out") => pr_refs(suite)
            .into_iter()
            .map(|(pr_number, branch)| OrchestratorEvent::CiFailed {
                pr_number,
                branch,
                check_run_id,
            })
            .collect(),
        Some("success") => pr_refs(suite)
            .into_iter()
            .map(|(pr_number, branch)| OrchestratorEvent::CiPassed { pr_number, branch })
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_pull_request_review(payload: &Value) -> Vec<OrchestratorEvent> {
    let (Some(pr_number), branch) = (
        payload.pointer("/pull_request/number").and_then(Value::as_i64),
        payload
            .pointer("/pull_request/head/ref")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    ) else {
        return Vec::new();
    };

    match payload.pointer("/review/state").and_then(Value::as_str) {
        Some("approved") => vec![OrchestratorEvent::PrApproved { pr_number, branch }],
        Some("changes_requested") => {
            let body = payload
                .pointer("/review/body")
                .and_then(Value::as_str)
                .unwrap_or("Changes requested.")
                .to_string();
            vec![OrchestratorEvent::PrChangesRequested {
                pr_number,
                branch,
                comments: vec![body],
            }]
        }
        _ => Vec::new(),
    }
}

fn parse_pull_request(payload: &Value) -> Vec<OrchestratorEvent> {
    if payload.get("action").and_then(Value::as_str) != Some("closed") {
        return Vec::new();
    }
    if payload.pointer("/pull_request/merged").and_then(Value::as_bool) != Some(true) {
        return Vec::new();
    }
    let Some(pr_number) = payload.pointer("/pull_request/number").and_then(Value::as_i64) else {
        return Vec::new();
    };
    let branch = payload
        .pointer("/pull_request/head/ref")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    vec![OrchestratorEvent::PrMerged { pr_number, branch }]
}

fn parse_issue_comment(payload: &Value) -> Vec<OrchestratorEvent> {
    let Some(issue) = payload.get("issue") else {
        return Vec::new();
    };
    // Issues without a PR link are plain tracker chatter, not PR feedback.
    if issue.get("pull_request").is_none() {
        return Vec::new();
    }
    let Some(pr_number) = issue.get("number").and_then(Value::as_i64) else {
        return Vec::new();
    };
    let Some(body) = payload.pointer("/comment/body").and_then(Value::as_str) else {
        return Vec::new();
    };

    vec![OrchestratorEvent::PrComment {
        pr_number,
        branch: String::new(),
        comments: vec![body.to_string()],
    }]
}
