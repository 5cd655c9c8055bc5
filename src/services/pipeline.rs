//! Sequential compositing pipeline and its deadline supervisor.
//!
//! A job's items are composited one at a time in creation order; each step's
//! output is the next step's base image. Every step boundary is committed to
//! the job store before the step runs so pollers see progress. The whole run,
//! caption included, is bounded by one deadline measured from `created_at`.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::db::store::{JobStore, StoreError};
use crate::models::job::{Category, FittingJob};
use crate::services::canvas;
use crate::services::generation::{Captioner, Compositor};
use crate::services::images::{ImageData, ImageSource};
use crate::services::storage::ObjectStore;

/// Time bounds applied to every fitting job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FittingLimits {
    /// Whole-job bound, from creation to terminal state.
    pub deadline: Duration,
    /// Bound on the caption call alone. Expiry only drops the caption.
    pub caption_timeout: Duration,
}

impl Default for FittingLimits {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(300),
            caption_timeout: Duration::from_secs(15),
        }
    }
}

/// How a supervised run ended, from this process's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(Option<Category>),
    TimedOut,
    /// Another writer reached a terminal state first.
    Superseded,
    /// The job was missing or already terminal when the run started.
    Skipped,
}

type InFlight = Arc<Mutex<Option<Category>>>;

pub struct Pipeline {
    store: Arc<dyn JobStore>,
    images: Arc<dyn ImageSource>,
    compositor: Arc<dyn Compositor>,
    captioner: Arc<dyn Captioner>,
    objects: Arc<dyn ObjectStore>,
    limits: FittingLimits,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        images: Arc<dyn ImageSource>,
        compositor: Arc<dyn Compositor>,
        captioner: Arc<dyn Captioner>,
        objects: Arc<dyn ObjectStore>,
        limits: FittingLimits,
    ) -> Self {
        Self {
            store,
            images,
            compositor,
            captioner,
            objects,
            limits,
        }
    }

    /// Runs a job to a terminal state under its deadline.
    ///
    /// The run executes on its own task. If the deadline fires first the job
    /// is committed as `timeout` and the run is left to notice the expiry at
    /// its next checkpoint; this call still waits for it to wind down.
    pub async fn supervise(self: Arc<Self>, job_id: Uuid) -> RunOutcome {
        let job = match self.store.get_job(job_id).await {
            Ok(Some(job)) if !job.state.is_terminal() => job,
            Ok(Some(job)) => {
                tracing::debug!(job_id = %job_id, state = %job.state, "Job already finished, skipping");
                return RunOutcome::Skipped;
            }
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "Dispatched job not found");
                return RunOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
                return RunOutcome::Skipped;
            }
        };

        let deadline = self.deadline_instant(&job);
        let expires_at = self.expiry_time(&job);
        let created_at = job.created_at;
        let in_flight: InFlight = Arc::new(Mutex::new(None));

        let mut handle = tokio::spawn(Arc::clone(&self).run(job, deadline, Arc::clone(&in_flight)));

        let raced = tokio::time::timeout_at(deadline, &mut handle).await;
        let outcome = match raced {
            Ok(Ok(Ok(RunOutcome::TimedOut))) => self.expire(job_id, expires_at).await,
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(e))) => {
                tracing::error!(job_id = %job_id, error = %e, "Job store error during run");
                self.fail_in_flight(job_id, &in_flight).await
            }
            Ok(Err(e)) => {
                tracing::error!(job_id = %job_id, error = %e, "Fitting run panicked");
                self.fail_in_flight(job_id, &in_flight).await
            }
            Err(_) => {
                let outcome = self.expire(job_id, expires_at).await;
                // The run is not aborted. It stops at its next checkpoint and
                // any late completion loses the compare-and-set.
                if let Err(e) = handle.await {
                    tracing::warn!(job_id = %job_id, error = %e, "Expired run ended abnormally");
                }
                outcome
            }
        };

        match outcome {
            RunOutcome::Completed => {
                metrics::counter!("fitting_jobs_completed").increment(1);
                let elapsed = (Utc::now() - created_at).num_milliseconds().max(0) as f64 / 1000.0;
                metrics::histogram!("fitting_processing_seconds").record(elapsed);
            }
            RunOutcome::Failed(_) => metrics::counter!("fitting_jobs_failed").increment(1),
            RunOutcome::TimedOut => metrics::counter!("fitting_jobs_timeout").increment(1),
            RunOutcome::Superseded | RunOutcome::Skipped => {}
        }

        tracing::info!(job_id = %job_id, outcome = ?outcome, "Fitting run finished");
        outcome
    }

    async fn run(
        self: Arc<Self>,
        job: FittingJob,
        deadline: Instant,
        in_flight: InFlight,
    ) -> Result<RunOutcome, StoreError> {
        let items = self.store.job_items(job.id).await?;
        if items.is_empty() {
            tracing::error!(job_id = %job.id, "Job has no items");
            return self.fail(job.id, None).await;
        }

        let photo = match self.images.fetch(&job.photo_reference).await {
            Ok(photo) => photo,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to fetch base photo");
                return self.fail(job.id, None).await;
            }
        };

        let mut garments = Vec::with_capacity(items.len());
        for item in &items {
            match self.images.fetch(&item.garment_reference).await {
                Ok(garment) => garments.push(garment),
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        item_id = item.item_id,
                        error = %e,
                        "Failed to fetch garment image"
                    );
                    return self.fail(job.id, None).await;
                }
            }
        }

        let blank = match canvas::blank_canvas(&photo) {
            Ok(blank) => blank,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to build canvas");
                return self.fail(job.id, None).await;
            }
        };

        let mut current = photo;
        for (item, garment) in items.iter().zip(&garments) {
            if Instant::now() >= deadline {
                return Ok(RunOutcome::TimedOut);
            }
            if !self.store.begin_step(job.id, item.category).await? {
                return Ok(RunOutcome::Superseded);
            }
            set_in_flight(&in_flight, Some(item.category));

            tracing::info!(job_id = %job.id, step = %item.category, item_id = item.item_id, "Compositing step started");
            let started = Instant::now();

            match self
                .compositor
                .composite(&current, garment, item.category, &blank)
                .await
            {
                Ok(composited) => {
                    let seconds = started.elapsed().as_secs_f64();
                    metrics::histogram!("fitting_step_seconds").record(seconds);
                    tracing::info!(job_id = %job.id, step = %item.category, seconds, "Compositing step finished");
                    current = composited;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, step = %item.category, error = %e, "Compositing step failed");
                    return self.fail(job.id, Some(item.category)).await;
                }
            }
        }
        set_in_flight(&in_flight, None);

        if Instant::now() >= deadline {
            return Ok(RunOutcome::TimedOut);
        }
        let caption = self.caption(job.id, &current).await;
        if Instant::now() >= deadline {
            return Ok(RunOutcome::TimedOut);
        }

        let key = result_key(job.id, &current.mime_type);
        if let Err(e) = self.objects.put(&key, &current.bytes, &current.mime_type).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to store fitting result");
            return self.fail(job.id, None).await;
        }

        if self
            .store
            .mark_completed(job.id, &key, caption.as_deref(), Utc::now())
            .await?
        {
            Ok(RunOutcome::Completed)
        } else {
            tracing::info!(job_id = %job.id, key = %key, "Job finished elsewhere, discarding result");
            if let Err(e) = self.objects.delete(&key).await {
                tracing::warn!(job_id = %job.id, key = %key, error = %e, "Failed to discard orphaned result");
            }
            Ok(RunOutcome::Superseded)
        }
    }

    /// Caption with its own shorter bound. Failure or expiry yields `None`.
    async fn caption(&self, job_id: Uuid, image: &ImageData) -> Option<String> {
        match tokio::time::timeout(self.limits.caption_timeout, self.captioner.caption(image)).await {
            Ok(Ok(caption)) => Some(caption),
            Ok(Err(e)) => {
                metrics::counter!("fitting_caption_failures").increment(1);
                tracing::warn!(job_id = %job_id, error = %e, "Caption generation failed");
                None
            }
            Err(_) => {
                metrics::counter!("fitting_caption_failures").increment(1);
                tracing::warn!(
                    job_id = %job_id,
                    timeout_secs = self.limits.caption_timeout.as_secs(),
                    "Caption generation timed out"
                );
                None
            }
        }
    }

    async fn fail(&self, job_id: Uuid, step: Option<Category>) -> Result<RunOutcome, StoreError> {
        if self.store.mark_failed(job_id, step, Utc::now()).await? {
            Ok(RunOutcome::Failed(step))
        } else {
            Ok(RunOutcome::Superseded)
        }
    }

    async fn fail_in_flight(&self, job_id: Uuid, in_flight: &InFlight) -> RunOutcome {
        let step = *in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        match self.fail(job_id, step).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
                RunOutcome::Superseded
            }
        }
    }

    async fn expire(&self, job_id: Uuid, expires_at: DateTime<Utc>) -> RunOutcome {
        match self.store.mark_timeout(job_id, expires_at).await {
            Ok(true) => {
                tracing::warn!(
                    job_id = %job_id,
                    deadline_secs = self.limits.deadline.as_secs(),
                    "Fitting job timed out"
                );
                RunOutcome::TimedOut
            }
            Ok(false) => RunOutcome::Superseded,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record job timeout");
                RunOutcome::Superseded
            }
        }
    }

    /// Monotonic instant at which the job's deadline passes.
    fn deadline_instant(&self, job: &FittingJob) -> Instant {
        let elapsed = (Utc::now() - job.created_at).to_std().unwrap_or_default();
        Instant::now() + self.limits.deadline.saturating_sub(elapsed)
    }

    /// Wall-clock expiry recorded as `finished_at` on timeout.
    fn expiry_time(&self, job: &FittingJob) -> DateTime<Utc> {
        expiry_time(job.created_at, self.limits.deadline)
    }
}

pub(crate) fn expiry_time(created_at: DateTime<Utc>, deadline: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(deadline)
        .ok()
        .and_then(|d| created_at.checked_add_signed(d))
        .unwrap_or(created_at)
}

fn set_in_flight(in_flight: &InFlight, step: Option<Category>) {
    *in_flight.lock().unwrap_or_else(PoisonError::into_inner) = step;
}

/// Object key for a job's final image.
pub fn result_key(job_id: Uuid, mime_type: &str) -> String {
    let extension = match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    };
    format!(
        "fittings/{}/{}.{}",
        job_id,
        Utc::now().format("%Y%m%dT%H%M%S%3f"),
        extension
    )
}
