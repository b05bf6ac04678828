//! Repository ports over the state store.
//!
//! The store is the sole source of truth; every mutation in the pipeline
//! goes through these traits. Implementations live in `adapters::sqlite`.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    CheckStatus, Design, DesignOutput, DesignStage, DesignStatus, IntakeRecord, PrStage, PrState,
};

#[async_trait]
pub trait DesignRepository: Send + Sync {
    async fn create(&self, design: &Design) -> DomainResult<()>;

    async fn get(&self, id: &str) -> DomainResult<Option<Design>>;

    async fn update_status(&self, id: &str, status: DesignStatus) -> DomainResult<()>;

    async fn update_stage(&self, id: &str, stage: DesignStage) -> DomainResult<()>;

    async fn set_page_id(&self, id: &str, page_id: &str) -> DomainResult<()>;

    async fn set_parent_key(&self, id: &str, parent_key: &str) -> DomainResult<()>;

    /// Returns the new attempt count.
    async fn increment_review_attempts(&self, id: &str) -> DomainResult<u32>;

    async fn list_by_status(&self, status: DesignStatus) -> DomainResult<Vec<Design>>;

    async fn record_intake(&self, intake: &IntakeRecord) -> DomainResult<()>;

    async fn get_intake(&self, design_id: &str) -> DomainResult<Option<IntakeRecord>>;
}

#[async_trait]
pub trait DesignOutputRepository: Send + Sync {
    /// Insert or replace the path for `(design, key)`.
    async fn upsert(&self, output: &DesignOutput) -> DomainResult<()>;

    async fn get(&self, design_id: &str, output_key: &str) -> DomainResult<Option<DesignOutput>>;

    async fn list_by_design(&self, design_id: &str) -> DomainResult<Vec<DesignOutput>>;
}

#[async_trait]
pub trait PrStateRepository: Send + Sync {
    async fn create(&self, pr: &PrState) -> DomainResult<()>;

    async fn get(&self, pr_number: i64) -> DomainResult<Option<PrState>>;

    async fn list_by_design(&self, design_id: &str) -> DomainResult<Vec<PrState>>;

    /// Rejects non-monotonic transitions.
    async fn update_stage(&self, pr_number: i64, stage: PrStage) -> DomainResult<()>;

    async fn update_ci_status(&self, pr_number: i64, status: CheckStatus) -> DomainResult<()>;

    async fn update_review_status(&self, pr_number: i64, status: CheckStatus) -> DomainResult<()>;

    /// Returns the new attempt count.
    async fn increment_ci_attempts(&self, pr_number: i64) -> DomainResult<u32>;

    /// Returns the new attempt count.
    async fn increment_review_attempts(&self, pr_number: i64) -> DomainResult<u32>;

    async fn reset_ci_attempts(&self, pr_number: i64) -> DomainResult<()>;

    async fn reset_review_attempts(&self, pr_number: i64) -> DomainResult<()>;

    /// CI passing and automated review passing.
    async fn check_ready_for_human(&self, pr_number: i64) -> DomainResult<bool>;

    /// Every PR under the design is merged; false when the design has none.
    async fn check_all_siblings_merged(&self, design_id: &str) -> DomainResult<bool>;
}
