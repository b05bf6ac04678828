//! SQLite implementation of the PR-state repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CheckStatus, PrStage, PrState};
use crate::domain::ports::PrStateRepository;

use super::design_repository::parse_timestamp;

#[derive(Clone)]
pub struct SqlitePrStateRepository {
    pool: SqlitePool,
}

impl SqlitePrStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn increment_counter(&self, pr_number: i64, column: &str) -> DomainResult<u32> {
        // column comes from a fixed set below, never from input
        let sql = format!(
            "UPDATE pr_states SET {column} = {column} + 1,
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE pr_number = ?"
        );
        let result = sqlx::query(&sql).bind(pr_number).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::PrNotFound(pr_number));
        }
        let (attempts,): (i64,) =
            sqlx::query_as(&format!("SELECT {column} FROM pr_states WHERE pr_number = ?"))
                .bind(pr_number)
                .fetch_one(&self.pool)
                .await?;
        Ok(attempts as u32)
    }

    async fn set_column(&self, pr_number: i64, column: &str, value: &str) -> DomainResult<()> {
        let sql = format!(
            "UPDATE pr_states SET {column} = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE pr_number = ?"
        );
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(pr_number)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::PrNotFound(pr_number));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct PrStateRow {
    pr_number: i64,
    design_id: String,
    stage: String,
    issue_key: String,
    parent_key: String,
    feature_slug: Option<String>,
    ci_status: String,
    review_status: String,
    ci_attempts: i64,
    review_attempts: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PrStateRow> for PrState {
    type Error = DomainError;

    fn try_from(row: PrStateRow) -> Result<Self, Self::Error> {
        Ok(PrState {
            pr_number: row.pr_number,
            design_id: row.design_id,
            stage: PrStage::parse(&row.stage)?,
            issue_key: row.issue_key,
            parent_key: row.parent_key,
            feature_slug: row.feature_slug,
            ci_status: CheckStatus::parse(&row.ci_status)?,
            review_status: CheckStatus::parse(&row.review_status)?,
            ci_attempts: row.ci_attempts as u32,
            review_attempts: row.review_attempts as u32,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl PrStateRepository for SqlitePrStateRepository {
    async fn create(&self, pr: &PrState) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO pr_states (pr_number, design_id, stage, issue_key, parent_key,
               feature_slug, ci_status, review_status, ci_attempts, review_attempts)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(pr.pr_number)
        .bind(&pr.design_id)
        .bind(pr.stage.as_str())
        .bind(&pr.issue_key)
        .bind(&pr.parent_key)
        .bind(&pr.feature_slug)
        .bind(pr.ci_status.as_str())
        .bind(pr.review_status.as_str())
        .bind(pr.ci_attempts as i64)
        .bind(pr.review_attempts as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, pr_number: i64) -> DomainResult<Option<PrState>> {
        let row: Option<PrStateRow> =
            sqlx::query_as("SELECT * FROM pr_states WHERE pr_number = ?")
                .bind(pr_number)
                .fetch_optional(&self.pool)
                .await?;
        row.map(PrState::try_from).transpose()
    }

    async fn list_by_design(&self, design_id: &str) -> DomainResult<Vec<PrState>> {
        let rows: Vec<PrStateRow> =
            sqlx::query_as("SELECT * FROM pr_states WHERE design_id = ? ORDER BY pr_number")
                .bind(design_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(PrState::try_from).collect()
    }

    async fn update_stage(&self, pr_number: i64, stage: PrStage) -> DomainResult<()> {
        let current = self
            .get(pr_number)
            .await?
            .ok_or(DomainError::PrNotFound(pr_number))?;
        if current.stage == stage {
            return Ok(());
        }
        if !current.stage.can_transition_to(stage) {
            return Err(DomainError::InvalidStateTransition {
                from: current.stage.to_string(),
                to: stage.to_string(),
            });
        }
        self.set_column(pr_number, "stage", stage.as_str()).await
    }

    async fn update_ci_status(&self, pr_number: i64, status: CheckStatus) -> DomainResult<()> {
        self.set_column(pr_number, "ci_status", status.as_str()).await
    }

    async fn update_review_status(&self, pr_number: i64, status: CheckStatus) -> DomainResult<()> {
        self.set_column(pr_number, "review_status", status.as_str())
            .await
    }

    async fn increment_ci_attempts(&self, pr_number: i64) -> DomainResult<u32> {
        self.increment_counter(pr_number, "ci_attempts").await
    }

    async fn increment_review_attempts(&self, pr_number: i64) -> DomainResult<u32> {
        self.increment_counter(pr_number, "review_attempts").await
    }

    async fn reset_ci_attempts(&self, pr_number: i64) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE pr_states SET ci_attempts = 0,
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE pr_number = ?",
        )
        .bind(pr_number)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::PrNotFound(pr_number));
        }
        Ok(())
    }

    async fn reset_review_attempts(&self, pr_number: i64) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE pr_states SET review_attempts = 0,
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE pr_number = ?",
        )
        .bind(pr_number)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::PrNotFound(pr_number));
        }
        Ok(())
    }

    async fn check_ready_for_human(&self, pr_number: i64) -> DomainResult<bool> {
        let pr = self
            .get(pr_number)
            .await?
            .ok_or(DomainError::PrNotFound(pr_number))?;
        Ok(pr.ready_for_human())
    }

    async fn check_all_siblings_merged(&self, design_id: &str) -> DomainResult<bool> {
        let (total, merged): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(stage = 'merged'), 0) FROM pr_states WHERE design_id = ?",
        )
        .bind(design_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total > 0 && total == merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::design_repository::SqliteDesignRepository;
    use crate::adapters::sqlite::migrations::{all_embedded_migrations, Migrator};
    use crate::domain::models::Design;
    use crate::domain::ports::DesignRepository;

    async fn setup() -> (SqlitePrStateRepository, SqlitePool) {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        SqliteDesignRepository::new(pool.clone())
            .create(&Design::new("d-1", "x"))
            .await
            .unwrap();
        (SqlitePrStateRepository::new(pool.clone()), pool)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (repo, _pool) = setup().await;
        let pr = PrState::new(200, "d-1", "TOS-40", "TOS-39").with_feature_slug("payments");
        repo.create(&pr).await.unwrap();

        let loaded = repo.get(200).await.unwrap().unwrap();
        assert_eq!(loaded.design_id, "d-1");
        assert_eq!(loaded.stage, PrStage::Implementation);
        assert_eq!(loaded.feature_slug.as_deref(), Some("payments"));
        assert_eq!(loaded.ci_status, CheckStatus::Pending);
    }

    #[tokio::test]
    async fn stage_transitions_are_monotonic() {
        let (repo, _pool) = setup().await;
        repo.create(&PrState::new(200, "d-1", "TOS-40", "TOS-39"))
            .await
            .unwrap();

        repo.update_stage(200, PrStage::InReview).await.unwrap();
        repo.update_stage(200, PrStage::Merged).await.unwrap();

        // Terminal: any further transition is rejected.
        let err = repo.update_stage(200, PrStage::Failed).await;
        assert!(matches!(
            err,
            Err(DomainError::InvalidStateTransition { .. })
        ));
        assert_eq!(repo.get(200).await.unwrap().unwrap().stage, PrStage::Merged);
    }

    #[tokio::test]
    async fn same_stage_update_is_a_no_op() {
        let (repo, _pool) = setup().await;
        repo.create(&PrState::new(200, "d-1", "TOS-40", "TOS-39"))
            .await
            .unwrap();
        repo.update_stage(200, PrStage::Implementation).await.unwrap();
    }

    #[tokio::test]
    async fn attempt_counters_increment_independently() {
        let (repo, _pool) = setup().await;
        repo.create(&PrState::new(200, "d-1", "TOS-40", "TOS-39"))
            .await
            .unwrap();

        assert_eq!(repo.increment_ci_attempts(200).await.unwrap(), 1);
        assert_eq!(repo.increment_ci_attempts(200).await.unwrap(), 2);
        assert_eq!(repo.increment_review_attempts(200).await.unwrap(), 1);

        repo.reset_ci_attempts(200).await.unwrap();
        let pr = repo.get(200).await.unwrap().unwrap();
        assert_eq!(pr.ci_attempts, 0);
        assert_eq!(pr.review_attempts, 1);
    }

    #[tokio::test]
    async fn ready_for_human_requires_both_passing() {
        let (repo, _pool) = setup().await;
        repo.create(&PrState::new(200, "d-1", "TOS-40", "TOS-39"))
            .await
            .unwrap();

        assert!(!repo.check_ready_for_human(200).await.unwrap());
        repo.update_ci_status(200, CheckStatus::Passing).await.unwrap();
        assert!(!repo.check_ready_for_human(200).await.unwrap());
        repo.update_review_status(200, CheckStatus::Passing)
            .await
            .unwrap();
        assert!(repo.check_ready_for_human(200).await.unwrap());
    }

    #[tokio::test]
    async fn all_siblings_merged_gate() {
        let (repo, _pool) = setup().await;

        // Empty set is not "all merged".
        assert!(!repo.check_all_siblings_merged("d-1").await.unwrap());

        repo.create(&PrState::new(200, "d-1", "TOS-40", "TOS-39"))
            .await
            .unwrap();
        repo.create(&PrState::new(201, "d-1", "TOS-41", "TOS-39"))
            .await
            .unwrap();

        repo.update_stage(200, PrStage::Merged).await.unwrap();
        assert!(!repo.check_all_siblings_merged("d-1").await.unwrap());

        repo.update_stage(201, PrStage::Merged).await.unwrap();
        assert!(repo.check_all_siblings_merged("d-1").await.unwrap());
    }
}
