//! In-memory job store with the same compare-and-set rules as [`PgJobStore`].
//!
//! Used by tests and local runs; nothing survives the process.
//!
//! [`PgJobStore`]: crate::db::queries::PgJobStore

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

use crate::db::store::{JobListing, JobStore, StoreError};
use crate::models::job::{Category, FittingItem, FittingJob, JobState, NewFittingJob};

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, (FittingJob, Vec<FittingItem>)>>,
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Poisoned
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies `change` to a job that is still processing.
    fn transition(
        &self,
        job_id: Uuid,
        change: impl FnOnce(&mut FittingJob),
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        match jobs.get_mut(&job_id) {
            Some((job, _)) if job.state == JobState::Processing => {
                change(job);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, new_job: NewFittingJob) -> Result<FittingJob, StoreError> {
        let job = FittingJob {
            id: Uuid::new_v4(),
            owner_id: new_job.owner_id,
            state: JobState::Processing,
            current_step: new_job.items.first().map(|item| item.category),
            failed_step: None,
            caption: None,
            result_reference: None,
            photo_reference: new_job.photo_reference,
            created_at: Utc::now(),
            finished_at: None,
        };

        self.jobs
            .write()
            .map_err(poison_err)?
            .insert(job.id, (job.clone(), new_job.items));

        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<FittingJob>, StoreError> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        Ok(jobs.get(&job_id).map(|(job, _)| job.clone()))
    }

    async fn job_items(&self, job_id: Uuid) -> Result<Vec<FittingItem>, StoreError> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        Ok(jobs
            .get(&job_id)
            .map(|(_, items)| items.clone())
            .unwrap_or_default())
    }

    async fn begin_step(&self, job_id: Uuid, step: Category) -> Result<bool, StoreError> {
        self.transition(job_id, |job| job.current_step = Some(step))
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        result_reference: &str,
        caption: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.transition(job_id, |job| {
            job.state = JobState::Completed;
            job.current_step = None;
            job.failed_step = None;
            job.result_reference = Some(result_reference.to_string());
            job.caption = caption.map(str::to_string);
            job.finished_at = Some(finished_at);
        })
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        failed_step: Option<Category>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.transition(job_id, |job| {
            job.state = JobState::Failed;
            job.current_step = None;
            job.failed_step = failed_step;
            job.finished_at = Some(finished_at);
        })
    }

    async fn mark_timeout(
        &self,
        job_id: Uuid,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.transition(job_id, |job| {
            job.state = JobState::Timeout;
            job.current_step = None;
            job.failed_step = None;
            job.finished_at = Some(finished_at);
        })
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<Option<FittingJob>, StoreError> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        Ok(jobs.remove(&job_id).map(|(job, _)| job))
    }

    async fn list_jobs(
        &self,
        owner_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<JobListing, StoreError> {
        let jobs = self.jobs.read().map_err(poison_err)?;

        let mut owned: Vec<_> = jobs
            .values()
            .filter(|(job, _)| job.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|(a, _), (b, _)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = owned.len() as i64;
        let page = owned
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();

        Ok(JobListing { jobs: page, total })
    }

    async fn stale_jobs(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<FittingJob>, StoreError> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        let mut stale: Vec<FittingJob> = jobs
            .values()
            .map(|(job, _)| job)
            .filter(|job| job.state == JobState::Processing && job.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|job| job.created_at);
        Ok(stale)
    }
}
