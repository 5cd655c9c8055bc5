//! Persistence contract for fitting jobs.
//!
//! The pipeline is the only writer of a job after creation. Every state
//! change is a compare-and-set against `state = 'processing'`: the methods
//! return `true` when the change was applied and `false` when the job is
//! missing or already terminal, so a terminal row is never rewritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::job::{Category, FittingItem, FittingJob, NewFittingJob};

/// One page of an owner's jobs, newest first.
#[derive(Debug, Clone, Default)]
pub struct JobListing {
    pub jobs: Vec<(FittingJob, Vec<FittingItem>)>,
    pub total: i64,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a job in `processing` with `current_step` set to the first item's category.
    async fn create_job(&self, new_job: NewFittingJob) -> Result<FittingJob, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<FittingJob>, StoreError>;

    /// Items of a job in their creation order.
    async fn job_items(&self, job_id: Uuid) -> Result<Vec<FittingItem>, StoreError>;

    /// Records the step about to be dispatched.
    async fn begin_step(&self, job_id: Uuid, step: Category) -> Result<bool, StoreError>;

    async fn mark_completed(
        &self,
        job_id: Uuid,
        result_reference: &str,
        caption: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn mark_failed(
        &self,
        job_id: Uuid,
        failed_step: Option<Category>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn mark_timeout(&self, job_id: Uuid, finished_at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Removes a job and its items, returning the removed row.
    async fn delete_job(&self, job_id: Uuid) -> Result<Option<FittingJob>, StoreError>;

    async fn list_jobs(
        &self,
        owner_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<JobListing, StoreError>;

    /// Jobs still `processing` that were created before `created_before`.
    async fn stale_jobs(&self, created_before: DateTime<Utc>)
        -> Result<Vec<FittingJob>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },

    #[error("Job store lock poisoned")]
    Poisoned,
}
