//! Per-pull-request progression state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// Stage of a pull request's journey through the pipeline.
///
/// Stages only advance forward; `Merged` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStage {
    Implementation,
    InReview,
    Merged,
    Failed,
}

impl PrStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implementation => "implementation",
            Self::InReview => "in_review",
            Self::Merged => "merged",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "implementation" => Ok(Self::Implementation),
            "in_review" => Ok(Self::InReview),
            "merged" => Ok(Self::Merged),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown PR stage: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::Failed)
    }

    /// Monotonic ordering check. `Failed` is reachable from any live stage.
    pub fn can_transition_to(&self, next: PrStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            PrStage::Implementation => false,
            PrStage::InReview => matches!(self, Self::Implementation),
            PrStage::Merged => matches!(self, Self::Implementation | Self::InReview),
            PrStage::Failed => true,
        }
    }
}

impl std::fmt::Display for PrStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Independent status of a CI or automated-review check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pending,
    Passing,
    Failing,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Passing => "passing",
            Self::Failing => "failing",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "passing" => Ok(Self::Passing),
            "failing" => Ok(Self::Failing),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown check status: {other}"
            ))),
        }
    }
}

/// One record per pull request, keyed by PR number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrState {
    pub pr_number: i64,
    pub design_id: String,
    pub stage: PrStage,
    pub issue_key: String,
    pub parent_key: String,
    pub feature_slug: Option<String>,
    pub ci_status: CheckStatus,
    pub review_status: CheckStatus,
    pub ci_attempts: u32,
    pub review_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PrState {
    pub fn new(
        pr_number: i64,
        design_id: impl Into<String>,
        issue_key: impl Into<String>,
        parent_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            pr_number,
            design_id: design_id.into(),
            stage: PrStage::Implementation,
            issue_key: issue_key.into(),
            parent_key: parent_key.into(),
            feature_slug: None,
            ci_status: CheckStatus::Pending,
            review_status: CheckStatus::Pending,
            ci_attempts: 0,
            review_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_feature_slug(mut self, slug: impl Into<String>) -> Self {
        self.feature_slug = Some(slug.into());
        self
    }

    /// CI and automated review both passing.
    pub fn ready_for_human(&self) -> bool {
        self.ci_status == CheckStatus::Passing && self.review_status == CheckStatus::Passing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_advances_monotonically() {
        assert!(PrStage::Implementation.can_transition_to(PrStage::InReview));
        assert!(PrStage::Implementation.can_transition_to(PrStage::Merged));
        assert!(PrStage::InReview.can_transition_to(PrStage::Merged));
        assert!(!PrStage::InReview.can_transition_to(PrStage::Implementation));
        assert!(!PrStage::Merged.can_transition_to(PrStage::Failed));
        assert!(!PrStage::Failed.can_transition_to(PrStage::InReview));
    }

    #[test]
    fn any_live_stage_can_fail() {
        assert!(PrStage::Implementation.can_transition_to(PrStage::Failed));
        assert!(PrStage::InReview.can_transition_to(PrStage::Failed));
    }

    #[test]
    fn ready_for_human_requires_both_checks() {
        let mut pr = PrState::new(200, "d-1", "TOS-40", "TOS-39");
        assert!(!pr.ready_for_human());
        pr.ci_status = CheckStatus::Passing;
        assert!(!pr.ready_for_human());
        pr.review_status = CheckStatus::Passing;
        assert!(pr.ready_for_human());
    }
}
