//! Design lifecycle models.
//!
//! A [`Design`] is one end-to-end unit of work: it enters through chat,
//! moves through an automated design-review loop against the document
//! store, and finishes when all of its implementation pull requests merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// Lifecycle stage of a design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesignStage {
    Design,
    Implementation,
    Complete,
}

impl DesignStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Design => "design",
            Self::Implementation => "implementation",
            Self::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "design" => Ok(Self::Design),
            "implementation" => Ok(Self::Implementation),
            "complete" => Ok(Self::Complete),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown design stage: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for DesignStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run status of a design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesignStatus {
    Running,
    Approved,
    Failed,
}

impl DesignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Approved => "approved",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "running" => Ok(Self::Running),
            "approved" => Ok(Self::Approved),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown design status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for DesignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work from intake to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Design {
    pub id: String,
    pub description: String,
    pub stage: DesignStage,
    pub status: DesignStatus,
    /// Document-store page id, set once the design doc is published.
    pub page_id: Option<String>,
    /// Issue-tracker parent key, set once the design is approved.
    pub parent_key: Option<String>,
    pub review_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Design {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            stage: DesignStage::Design,
            status: DesignStatus::Running,
            page_id: None,
            parent_key: None,
            review_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Pointer to a file an agent wrote, keyed per design.
///
/// Keys follow the `design_doc`, `design_doc.r1`, ... convention. Handlers
/// pass these paths over the queues, never the file content itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignOutput {
    pub design_id: String,
    pub output_key: String,
    pub path: String,
}

impl DesignOutput {
    pub fn new(
        design_id: impl Into<String>,
        output_key: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            design_id: design_id.into(),
            output_key: output_key.into(),
            path: path.into(),
        }
    }
}

/// Chat metadata captured at intake.
///
/// Kept separate from the design row so notifications can thread under the
/// originating message without widening the design shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRecord {
    pub design_id: String,
    pub channel: String,
    pub thread_ts: Option<String>,
    pub user_id: String,
    pub user_name: String,
    pub created_at: DateTime<Utc>,
}

/// Key for the design document at a given revision.
///
/// Revision 0 is the original `design_doc`; later revisions append `.rN`.
pub fn design_doc_key(revision: u32) -> String {
    if revision == 0 {
        "design_doc".to_string()
    } else {
        format!("design_doc.r{revision}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_round_trips_through_str() {
        for stage in [
            DesignStage::Design,
            DesignStage::Implementation,
            DesignStage::Complete,
        ] {
            assert_eq!(DesignStage::parse(stage.as_str()).unwrap(), stage);
        }
        assert!(DesignStage::parse("review").is_err());
    }

    #[test]
    fn new_design_starts_running_in_design_stage() {
        let d = Design::new("d-1", "Build payments");
        assert_eq!(d.stage, DesignStage::Design);
        assert_eq!(d.status, DesignStatus::Running);
        assert_eq!(d.review_attempts, 0);
        assert!(d.page_id.is_none());
        assert!(d.parent_key.is_none());
    }

    #[test]
    fn design_doc_key_convention() {
        assert_eq!(design_doc_key(0), "design_doc");
        assert_eq!(design_doc_key(1), "design_doc.r1");
        assert_eq!(design_doc_key(12), "design_doc.r12");
    }
}
