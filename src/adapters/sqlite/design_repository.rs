//! SQLite implementation of the design repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Design, DesignOutput, DesignStage, DesignStatus, IntakeRecord,
};
use crate::domain::ports::{DesignOutputRepository, DesignRepository};

#[derive(Clone)]
pub struct SqliteDesignRepository {
    pool: SqlitePool,
}

impl SqliteDesignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DesignRow {
    id: String,
    description: String,
    stage: String,
    status: String,
    page_id: Option<String>,
    parent_key: Option<String>,
    review_attempts: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<DesignRow> for Design {
    type Error = DomainError;

    fn try_from(row: DesignRow) -> Result<Self, Self::Error> {
        Ok(Design {
            id: row.id,
            description: row.description,
            stage: DesignStage::parse(&row.stage)?,
            status: DesignStatus::parse(&row.status)?,
            page_id: row.page_id,
            parent_key: row.parent_key,
            review_attempts: row.review_attempts as u32,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

pub(crate) fn parse_timestamp(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::ValidationFailed(format!("bad timestamp {s}: {e}")))
}

#[async_trait]
impl DesignRepository for SqliteDesignRepository {
    async fn create(&self, design: &Design) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO designs (id, description, stage, status, page_id, parent_key, review_attempts)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&design.id)
        .bind(&design.description)
        .bind(design.stage.as_str())
        .bind(design.status.as_str())
        .bind(&design.page_id)
        .bind(&design.parent_key)
        .bind(design.review_attempts as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Design>> {
        let row: Option<DesignRow> = sqlx::query_as("SELECT * FROM designs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Design::try_from).transpose()
    }

    async fn update_status(&self, id: &str, status: DesignStatus) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE designs SET status = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::DesignNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn update_stage(&self, id: &str, stage: DesignStage) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE designs SET stage = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
        )
        .bind(stage.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::DesignNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_page_id(&self, id: &str, page_id: &str) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE designs SET page_id = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
        )
        .bind(page_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::DesignNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_parent_key(&self, id: &str, parent_key: &str) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE designs SET parent_key = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
        )
        .bind(parent_key)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::DesignNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn increment_review_attempts(&self, id: &str) -> DomainResult<u32> {
        let result = sqlx::query(
            "UPDATE designs SET review_attempts = review_attempts + 1,
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::DesignNotFound(id.to_string()));
        }
        let (attempts,): (i64,) = sqlx::query_as("SELECT review_attempts FROM designs WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(attempts as u32)
    }

    async fn list_by_status(&self, status: DesignStatus) -> DomainResult<Vec<Design>> {
        let rows: Vec<DesignRow> =
            sqlx::query_as("SELECT * FROM designs WHERE status = ? ORDER BY created_at")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Design::try_from).collect()
    }

    async fn record_intake(&self, intake: &IntakeRecord) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO design_intake (design_id, channel, thread_ts, user_id, user_name)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&intake.design_id)
        .bind(&intake.channel)
        .bind(&intake.thread_ts)
        .bind(&intake.user_id)
        .bind(&intake.user_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_intake(&self, design_id: &str) -> DomainResult<Option<IntakeRecord>> {
        #[derive(sqlx::FromRow)]
        struct IntakeRow {
            design_id: String,
            channel: String,
            thread_ts: Option<String>,
            user_id: String,
            user_name: String,
            created_at: String,
        }

        let row: Option<IntakeRow> =
            sqlx::query_as("SELECT * FROM design_intake WHERE design_id = ?")
                .bind(design_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|r| {
            Ok(IntakeRecord {
                design_id: r.design_id,
                channel: r.channel,
                thread_ts: r.thread_ts,
                user_id: r.user_id,
                user_name: r.user_name,
                created_at: parse_timestamp(&r.created_at)?,
            })
        })
        .transpose()
    }
}

#[derive(Clone)]
pub struct SqliteDesignOutputRepository {
    pool: SqlitePool,
}

impl SqliteDesignOutputRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DesignOutputRepository for SqliteDesignOutputRepository {
    async fn upsert(&self, output: &DesignOutput) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO design_outputs (design_id, output_key, path) VALUES (?, ?, ?)
               ON CONFLICT (design_id, output_key) DO UPDATE SET path = excluded.path"#,
        )
        .bind(&output.design_id)
        .bind(&output.output_key)
        .bind(&output.path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, design_id: &str, output_key: &str) -> DomainResult<Option<DesignOutput>> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT design_id, output_key, path FROM design_outputs
             WHERE design_id = ? AND output_key = ?",
        )
        .bind(design_id)
        .bind(output_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(design_id, output_key, path)| DesignOutput {
            design_id,
            output_key,
            path,
        }))
    }

    async fn list_by_design(&self, design_id: &str) -> DomainResult<Vec<DesignOutput>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT design_id, output_key, path FROM design_outputs
             WHERE design_id = ? ORDER BY created_at",
        )
        .bind(design_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(design_id, output_key, path)| DesignOutput {
                design_id,
                output_key,
                path,
            })
            .collect())
    }
}
