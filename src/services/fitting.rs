use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::catalog::Catalog;
use crate::db::store::JobStore;
use crate::error::FittingError;
use crate::models::fitting::{
    DeleteResponse, FittingAccepted, FittingRequest, HistoryEntry, HistoryItem, HistoryPage,
    HistoryQuery, JobStatusPayload, Pagination,
};
use crate::models::job::{FittingItem, NewFittingJob};
use crate::services::pipeline::FittingLimits;
use crate::services::projector;
use crate::services::runner::JobRunner;
use crate::services::storage::ObjectStore;
use crate::services::validation;

/// Creation, polling, deletion and history of fitting jobs.
pub struct FittingService {
    store: Arc<dyn JobStore>,
    catalog: Arc<dyn Catalog>,
    objects: Arc<dyn ObjectStore>,
    runner: Arc<JobRunner>,
    limits: FittingLimits,
    result_base_url: String,
}

impl FittingService {
    pub fn new(
        store: Arc<dyn JobStore>,
        catalog: Arc<dyn Catalog>,
        objects: Arc<dyn ObjectStore>,
        runner: Arc<JobRunner>,
        limits: FittingLimits,
        result_base_url: String,
    ) -> Self {
        Self {
            store,
            catalog,
            objects,
            runner,
            limits,
            result_base_url,
        }
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    /// Validate, persist a `processing` job and hand it to the runner.
    pub async fn start_fitting(
        &self,
        owner_id: Uuid,
        request: &FittingRequest,
    ) -> Result<FittingAccepted, FittingError> {
        let photo_reference = self
            .catalog
            .latest_photo(owner_id)
            .await?
            .ok_or(FittingError::PhotoRequired)?;

        let requested = validation::validate_fitting_request(request)?;

        let ids: Vec<i64> = requested.iter().map(|(id, _)| *id).collect();
        let images = self.catalog.main_images(&ids).await?;

        let items = requested
            .into_iter()
            .map(|(item_id, category)| {
                let garment_reference = images
                    .get(&item_id)
                    .cloned()
                    .ok_or(FittingError::InvalidItemId(item_id))?;
                Ok(FittingItem {
                    item_id,
                    category,
                    garment_reference,
                })
            })
            .collect::<Result<Vec<_>, FittingError>>()?;

        let job = self
            .store
            .create_job(NewFittingJob {
                owner_id,
                photo_reference,
                items,
            })
            .await?;

        metrics::counter!("fitting_jobs_total").increment(1);
        tracing::info!(job_id = %job.id, owner_id = %owner_id, "Fitting job accepted");

        self.runner.dispatch(job.id);

        Ok(FittingAccepted {
            job_id: job.id,
            status: job.state,
            current_step: job.current_step,
            created_at: job.created_at,
        })
    }

    pub async fn job_status(
        &self,
        requester: Uuid,
        job_id: Uuid,
    ) -> Result<JobStatusPayload, FittingError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(FittingError::JobNotFound)?;
        projector::authorize(&job, requester)?;
        projector::project(&job, &self.limits, &self.result_base_url)
    }

    /// Remove a job and, best-effort, its stored result image.
    ///
    /// An in-flight run is not interrupted; its later writes find no row.
    pub async fn delete_job(
        &self,
        requester: Uuid,
        job_id: Uuid,
    ) -> Result<DeleteResponse, FittingError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(FittingError::JobNotFound)?;
        projector::authorize(&job, requester)?;

        let deleted = self
            .store
            .delete_job(job_id)
            .await?
            .ok_or(FittingError::JobNotFound)?;

        if let Some(key) = deleted.result_reference.as_deref() {
            if let Err(e) = self.objects.delete(key).await {
                tracing::warn!(job_id = %job_id, key = %key, error = %e, "Failed to delete result image");
            }
        }

        tracing::info!(job_id = %job_id, "Fitting job deleted");
        Ok(DeleteResponse {
            message: "Fitting result deleted".to_string(),
            deleted_at: Utc::now(),
        })
    }

    /// Owner's jobs, newest first.
    pub async fn history(
        &self,
        owner_id: Uuid,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, FittingError> {
        let offset = validation::validate_history_query(query)?;
        let listing = self.store.list_jobs(owner_id, offset, query.limit).await?;

        let mut ids: Vec<i64> = listing
            .jobs
            .iter()
            .flat_map(|(_, items)| items.iter().map(|item| item.item_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        let names = self.catalog.item_names(&ids).await?;

        let fittings = listing
            .jobs
            .into_iter()
            .map(|(job, items)| HistoryEntry {
                job_id: job.id,
                status: job.state,
                result_reference: job
                    .result_reference
                    .as_deref()
                    .map(|key| projector::public_url(&self.result_base_url, key)),
                items: items
                    .into_iter()
                    .map(|item| HistoryItem {
                        item_id: item.item_id,
                        category: item.category,
                        name: names.get(&item.item_id).cloned(),
                    })
                    .collect(),
                created_at: job.created_at,
            })
            .collect();

        Ok(HistoryPage {
            fittings,
            pagination: paginate(query.page, query.limit, listing.total),
        })
    }
}

fn paginate(page: i64, limit: i64, total: i64) -> Pagination {
    let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
    Pagination {
        current_page: page,
        total_pages,
        total_items: total,
        has_next: page < total_pages,
        has_prev: page > 1,
    }
}
