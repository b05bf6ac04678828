//! HTTP ingress.
//!
//! One webhook endpoint per external source (verify, then parse, then
//! dispatch), manual retry and trigger endpoints, and a health probe.

pub mod parsers;
pub mod verify;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::domain::models::{
    AgentJob, AgentKind, Envelope, EventSource, OrchestratorEvent, TaskKind,
};
use crate::domain::ports::{ChatNotifier, DesignRepository, PrStateRepository};
use crate::services::router::AgentQueues;

use parsers::{parse_github, parse_slack};
use verify::{GitHubVerifier, SlackVerifier};

pub struct HttpState {
    pub slack_verifier: SlackVerifier,
    pub github_verifier: GitHubVerifier,
    pub chat: Arc<dyn ChatNotifier>,
    pub designs: Arc<dyn DesignRepository>,
    pub prs: Arc<dyn PrStateRepository>,
    pub events: mpsc::UnboundedSender<Envelope>,
    pub queues: AgentQueues,
}

impl HttpState {
    fn emit(&self, source: EventSource, raw: Value, event: OrchestratorEvent) {
        let envelope = Envelope::new(source, event).with_raw(raw);
        if self.events.send(envelope).is_err() {
            warn!("event channel closed, dropping webhook event");
        }
    }
}

pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/webhook/:source", post(webhook_handler))
        .route("/retry/:pr_number/ci", post(retry_ci_handler))
        .route("/retry/:pr_number/review", post(retry_review_handler))
        .route("/trigger/:design_id", post(trigger_handler))
        .route("/healthz", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: Arc<HttpState>, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP ingress listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "ok": false, "error": message.into() }))).into_response()
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn webhook_handler(
    State(state): State<Arc<HttpState>>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match source.as_str() {
        "slack" => slack_webhook(state, headers, body).await,
        "github" => github_webhook(state, headers, body).await,
        other => error_response(StatusCode::NOT_FOUND, format!("unknown source: {other}")),
    }
}

async fn slack_webhook(state: Arc<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    let now = chrono::Utc::now().timestamp();
    if let Err(e) = state.slack_verifier.verify(
        header(&headers, "x-slack-request-timestamp"),
        header(&headers, "x-slack-signature"),
        &body,
        now,
    ) {
        warn!(error = %e, "slack webhook rejected");
        return error_response(StatusCode::UNAUTHORIZED, e.to_string());
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("bad json: {e}")),
    };

    // Slack's endpoint handshake answers inline, before any dispatch.
    if payload.get("type").and_then(Value::as_str) == Some("url_verification") {
        let challenge = payload
            .get("challenge")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Json(json!({ "challenge": challenge })).into_response();
    }

    for mut event in parse_slack(&payload) {
        // Best-effort display-name enrichment; the user id stands in when
        // the lookup fails.
        if let OrchestratorEvent::TaskRequested {
            ref sender_id,
            ref mut sender_name,
            ..
        } = event
        {
            if let Ok(name) = state.chat.get_user_name(sender_id).await {
                *sender_name = name;
            }
        }
        state.emit(EventSource::Chat, payload.clone(), event);
    }
    Json(json!({ "ok": true })).into_response()
}

async fn github_webhook(state: Arc<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(e) = state
        .github_verifier
        .verify(header(&headers, "x-hub-signature-256"), &body)
    {
        warn!(error = %e, "github webhook rejected");
        return error_response(StatusCode::UNAUTHORIZED, e.to_string());
    }

    let event_type = header(&headers, "x-github-event").unwrap_or_default().to_string();
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("bad json: {e}")),
    };

    for event in parse_github(&event_type, &payload) {
        state.emit(EventSource::SourceControl, payload.clone(), event);
    }
    Json(json!({ "ok": true })).into_response()
}

/// Reset the CI counter and run the failure path again.
async fn retry_ci_handler(
    State(state): State<Arc<HttpState>>,
    Path(pr_number): Path<i64>,
) -> Response {
    let pr = match state.prs.get(pr_number).await {
        Ok(Some(pr)) => pr,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, format!("no PR #{pr_number}")),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    if let Err(e) = state.prs.reset_ci_attempts(pr_number).await {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    state.emit(
        EventSource::Internal,
        json!({ "retry": "ci" }),
        OrchestratorEvent::CiFailed {
            pr_number,
            branch: String::new(),
            check_run_id: None,
        },
    );
    info!(pr_number, design_id = %pr.design_id, "manual CI retry requested");
    Json(json!({ "ok": true })).into_response()
}

/// Reset the review counter and re-enqueue the automated review.
async fn retry_review_handler(
    State(state): State<Arc<HttpState>>,
    Path(pr_number): Path<i64>,
) -> Response {
    let pr = match state.prs.get(pr_number).await {
        Ok(Some(pr)) => pr,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, format!("no PR #{pr_number}")),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    if let Err(e) = state.prs.reset_review_attempts(pr_number).await {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    let review = AgentJob::new(AgentKind::Reviewer, TaskKind::CodeReview, &pr.design_id)
        .with_pr(pr_number)
        .with_issue_key(pr.issue_key.clone());
    state.queues.reviewer.push_job(review);
    info!(pr_number, "manual review retry requested");
    Json(json!({ "ok": true })).into_response()
}

/// Re-emit the intake event for a stuck design.
async fn trigger_handler(
    State(state): State<Arc<HttpState>>,
    Path(design_id): Path<String>,
) -> Response {
    let design = match state.designs.get(&design_id).await {
        Ok(Some(design)) => design,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, format!("no design {design_id}"))
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let intake = match state.designs.get_intake(&design_id).await {
        Ok(intake) => intake,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    // A re-trigger restarts the design agent rather than re-running intake,
    // which would create a second design row.
    let job = AgentJob::new(AgentKind::Architect, TaskKind::Design, &design.id);
    state.queues.architect.push_job(job);

    if let Some(intake) = intake {
        let _ = state
            .chat
            .post_message(
                &intake.channel,
                &format!("Re-triggered design run for: {}", design.description),
                intake.thread_ts.as_deref(),
            )
            .await;
    }
    info!(design_id = %design_id, "manual trigger requested");
    Json(json!({ "ok": true })).into_response()
}
