//! Domain events flowing through the dispatch fabric.
//!
//! Events are a closed sum type; dispatch matches on the discriminant
//! rather than on subtype polymorphism. External ingress (webhooks, the
//! polling bridge) and internal progression (agent completions, stage
//! changes) all produce the same envelope shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::{AgentJob, AgentKind, AgentRunResult, TaskKind};
use super::design::DesignStage;

/// Where an event entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Chat,
    SourceControl,
    DocStore,
    Internal,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Chat => "chat",
            Self::SourceControl => "source_control",
            Self::DocStore => "doc_store",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A tagged domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A human asked for work through chat. The original ack callback is
    /// realised as the `{channel, thread_ts}` pair handlers reply to.
    TaskRequested {
        message: String,
        sender_id: String,
        sender_name: String,
        channel: String,
        thread_ts: Option<String>,
    },
    PageApproved {
        page_id: String,
        design_id: String,
    },
    /// Always carries at least one comment.
    PageComment {
        page_id: String,
        design_id: String,
        comments: Vec<String>,
    },
    PrChangesRequested {
        pr_number: i64,
        branch: String,
        comments: Vec<String>,
    },
    PrComment {
        pr_number: i64,
        branch: String,
        comments: Vec<String>,
    },
    PrApproved {
        pr_number: i64,
        branch: String,
    },
    PrMerged {
        pr_number: i64,
        branch: String,
    },
    CiFailed {
        pr_number: i64,
        branch: String,
        check_run_id: Option<i64>,
    },
    CiPassed {
        pr_number: i64,
        branch: String,
    },
    AgentCompleted {
        job: AgentJob,
        result: AgentRunResult,
    },
    StageCompleted {
        design_id: String,
        from: DesignStage,
        to: DesignStage,
    },
}

impl OrchestratorEvent {
    /// Wire-format discriminant, used for logging and route decisions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskRequested { .. } => "task:requested",
            Self::PageApproved { .. } => "page:approved",
            Self::PageComment { .. } => "page:comment",
            Self::PrChangesRequested { .. } => "pr:changes_requested",
            Self::PrComment { .. } => "pr:comment",
            Self::PrApproved { .. } => "pr:approved",
            Self::PrMerged { .. } => "pr:merged",
            Self::CiFailed { .. } => "ci:failed",
            Self::CiPassed { .. } => "ci:passed",
            Self::AgentCompleted { .. } => "agent:completed",
            Self::StageCompleted { .. } => "stage:completed",
        }
    }

    /// PR number for source-control events.
    pub fn pr_number(&self) -> Option<i64> {
        match self {
            Self::PrChangesRequested { pr_number, .. }
            | Self::PrComment { pr_number, .. }
            | Self::PrApproved { pr_number, .. }
            | Self::PrMerged { pr_number, .. }
            | Self::CiFailed { pr_number, .. }
            | Self::CiPassed { pr_number, .. } => Some(*pr_number),
            Self::AgentCompleted { job, .. } => job.pr_number,
            _ => None,
        }
    }

    /// Design id for document and internal events.
    pub fn design_id(&self) -> Option<&str> {
        match self {
            Self::PageApproved { design_id, .. } | Self::PageComment { design_id, .. } => {
                Some(design_id)
            }
            Self::AgentCompleted { job, .. } => Some(&job.design_id),
            Self::StageCompleted { design_id, .. } => Some(design_id),
            _ => None,
        }
    }

    pub fn agent_route(&self) -> Option<(AgentKind, TaskKind)> {
        match self {
            Self::AgentCompleted { job, .. } => Some((job.agent, job.task)),
            _ => None,
        }
    }
}

/// Event plus ingestion metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub source: EventSource,
    pub received_at: DateTime<Utc>,
    /// Raw upstream payload, kept opaque for debugging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    pub event: OrchestratorEvent,
}

impl Envelope {
    pub fn new(source: EventSource, event: OrchestratorEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            received_at: Utc::now(),
            raw: None,
            event,
        }
    }

    pub fn internal(event: OrchestratorEvent) -> Self {
        Self::new(EventSource::Internal, event)
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_wire_format() {
        let ev = OrchestratorEvent::CiFailed {
            pr_number: 200,
            branch: "feature/tos-40-payments".into(),
            check_run_id: None,
        };
        assert_eq!(ev.kind(), "ci:failed");
        assert_eq!(ev.pr_number(), Some(200));
        assert!(ev.design_id().is_none());
    }

    #[test]
    fn envelope_carries_source_and_id() {
        let env = Envelope::new(
            EventSource::Chat,
            OrchestratorEvent::TaskRequested {
                message: "Build payments".into(),
                sender_id: "U1".into(),
                sender_name: "Ada".into(),
                channel: "C1".into(),
                thread_ts: None,
            },
        );
        assert_eq!(env.source, EventSource::Chat);
        assert_eq!(env.event.kind(), "task:requested");
    }

    #[test]
    fn events_serialize_with_tag_and_data() {
        let ev = OrchestratorEvent::PageApproved {
            page_id: "p-9".into(),
            design_id: "d-1".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "page_approved");
        assert_eq!(json["data"]["design_id"], "d-1");
    }
}
