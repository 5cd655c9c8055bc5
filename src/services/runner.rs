use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::db::store::{JobStore, StoreError};
use crate::services::pipeline::{self, FittingLimits, Pipeline};

/// Owns the background tasks running fitting jobs.
pub struct JobRunner {
    pipeline: Arc<Pipeline>,
    tasks: Mutex<JoinSet<()>>,
}

impl JobRunner {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Start a supervised run for `job_id` and return immediately.
    pub fn dispatch(&self, job_id: Uuid) {
        let pipeline = Arc::clone(&self.pipeline);
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            pipeline.supervise(job_id).await;
        });
        tracing::debug!(job_id = %job_id, in_flight = tasks.len(), "Fitting job dispatched");
    }

    /// Number of runs not yet reaped.
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Wait up to `grace` for running jobs, then abort the rest.
    ///
    /// Aborted jobs stay `processing` until the reconciler times them out.
    pub async fn shutdown(&self, grace: Duration) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        if tasks.is_empty() {
            return;
        }

        tracing::info!(in_flight = tasks.len(), "Waiting for fitting jobs to finish");
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = tasks.len(), "Aborting unfinished fitting jobs");
            tasks.shutdown().await;
        }
    }
}

/// Times out jobs left in `processing` by a crashed or restarted process.
pub struct Reconciler {
    store: Arc<dyn JobStore>,
    limits: FittingLimits,
    grace: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn JobStore>, limits: FittingLimits, grace: Duration) -> Self {
        Self {
            store,
            limits,
            grace,
        }
    }

    /// One pass: every job past its deadline plus grace is moved to `timeout`.
    /// Returns how many jobs were transitioned.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let horizon = chrono::Duration::from_std(self.limits.deadline + self.grace)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(now);

        let mut swept = 0;
        for job in self.store.stale_jobs(horizon).await? {
            let expired_at = pipeline::expiry_time(job.created_at, self.limits.deadline);
            if self.store.mark_timeout(job.id, expired_at).await? {
                tracing::warn!(job_id = %job.id, created_at = %job.created_at, "Abandoned fitting job timed out");
                metrics::counter!("fitting_jobs_timeout").increment(1);
                swept += 1;
            }
        }
        Ok(swept)
    }

    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep(Utc::now()).await {
                    Ok(0) => tracing::trace!("No abandoned fitting jobs"),
                    Ok(n) => tracing::info!(swept = n, "Reconciled abandoned fitting jobs"),
                    Err(e) => tracing::error!(error = %e, "Reconcile sweep failed"),
                }
            }
        })
    }
}
