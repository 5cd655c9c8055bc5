use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::store::{JobListing, JobStore, StoreError};
use crate::models::job::{Category, FittingItem, FittingJob, JobState, NewFittingJob};

const JOB_COLUMNS: &str = "id, owner_id, state, current_step, failed_step, caption, \
                           result_reference, photo_reference, created_at, finished_at";

/// Postgres-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_category(id: Uuid, value: Option<String>) -> Result<Option<Category>, StoreError> {
    value
        .map(|v| {
            v.parse::<Category>().map_err(|_| StoreError::Corrupt {
                id,
                reason: format!("unknown category '{}'", v),
            })
        })
        .transpose()
}

fn job_from_row(row: &PgRow) -> Result<FittingJob, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let state_str: String = row.try_get("state")?;
    let state = state_str
        .parse::<JobState>()
        .map_err(|_| StoreError::Corrupt {
            id,
            reason: format!("unknown state '{}'", state_str),
        })?;

    Ok(FittingJob {
        id,
        owner_id: row.try_get("owner_id")?,
        state,
        current_step: parse_category(id, row.try_get("current_step")?)?,
        failed_step: parse_category(id, row.try_get("failed_step")?)?,
        caption: row.try_get("caption")?,
        result_reference: row.try_get("result_reference")?,
        photo_reference: row.try_get("photo_reference")?,
        created_at: row.try_get("created_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<(Uuid, FittingItem), StoreError> {
    let job_id: Uuid = row.try_get("job_id")?;
    let category: String = row.try_get("category")?;
    let category = parse_category(job_id, Some(category))?.ok_or_else(|| StoreError::Corrupt {
        id: job_id,
        reason: "item without category".to_string(),
    })?;

    Ok((
        job_id,
        FittingItem {
            item_id: row.try_get("item_id")?,
            category,
            garment_reference: row.try_get("garment_reference")?,
        },
    ))
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, new_job: NewFittingJob) -> Result<FittingJob, StoreError> {
        let id = Uuid::new_v4();
        let first_step = new_job.items.first().map(|item| item.category.as_str().to_string());

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO fitting_jobs (id, owner_id, state, current_step, photo_reference, created_at)
            VALUES ($1, $2, 'processing', $3, $4, $5)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new_job.owner_id)
        .bind(first_step)
        .bind(&new_job.photo_reference)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        for (position, item) in new_job.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO fitting_job_items (job_id, position, item_id, category, garment_reference)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id)
            .bind(position as i16)
            .bind(item.item_id)
            .bind(item.category.as_str())
            .bind(&item.garment_reference)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        job_from_row(&row)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<FittingJob>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM fitting_jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn job_items(&self, job_id: Uuid) -> Result<Vec<FittingItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, item_id, category, garment_reference
            FROM fitting_job_items
            WHERE job_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| item_from_row(r).map(|(_, item)| item))
            .collect()
    }

    async fn begin_step(&self, job_id: Uuid, step: Category) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fitting_jobs
            SET current_step = $2
            WHERE id = $1 AND state = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(step.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        result_reference: &str,
        caption: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fitting_jobs
            SET state = 'completed',
                current_step = NULL,
                failed_step = NULL,
                result_reference = $2,
                caption = $3,
                finished_at = $4
            WHERE id = $1 AND state = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(result_reference)
        .bind(caption)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        failed_step: Option<Category>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fitting_jobs
            SET state = 'failed',
                current_step = NULL,
                failed_step = $2,
                finished_at = $3
            WHERE id = $1 AND state = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(failed_step.map(|step| step.as_str().to_string()))
        .bind(finished_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_timeout(
        &self,
        job_id: Uuid,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fitting_jobs
            SET state = 'timeout',
                current_step = NULL,
                failed_step = NULL,
                finished_at = $2
            WHERE id = $1 AND state = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<Option<FittingJob>, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM fitting_jobs WHERE id = $1 RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(
        &self,
        owner_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<JobListing, StoreError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM fitting_jobs WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        if total == 0 {
            return Ok(JobListing::default());
        }

        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM fitting_jobs
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "#
        ))
        .bind(owner_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = jobs.iter().map(|job| job.id).collect();

        let item_rows = sqlx::query(
            r#"
            SELECT job_id, item_id, category, garment_reference
            FROM fitting_job_items
            WHERE job_id = ANY($1)
            ORDER BY job_id, position ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items_by_job: HashMap<Uuid, Vec<FittingItem>> = HashMap::new();
        for row in &item_rows {
            let (job_id, item) = item_from_row(row)?;
            items_by_job.entry(job_id).or_default().push(item);
        }

        Ok(JobListing {
            jobs: jobs
                .into_iter()
                .map(|job| {
                    let items = items_by_job.remove(&job.id).unwrap_or_default();
                    (job, items)
                })
                .collect(),
            total,
        })
    }

    async fn stale_jobs(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<FittingJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM fitting_jobs
            WHERE state = 'processing' AND created_at < $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }
}
