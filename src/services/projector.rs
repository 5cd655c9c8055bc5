use uuid::Uuid;

use crate::error::FittingError;
use crate::models::fitting::JobStatusPayload;
use crate::models::job::{FittingJob, JobState};
use crate::services::pipeline::FittingLimits;

pub const FALLBACK_CAPTION: &str = "We couldn't write a comment for this look.";
const GENERIC_FAILURE: &str = "Error while fitting the outfit";

/// Only the owner may see or delete a job.
pub fn authorize(job: &FittingJob, requester: Uuid) -> Result<(), FittingError> {
    if job.owner_id == requester {
        Ok(())
    } else {
        Err(FittingError::Forbidden)
    }
}

/// Map a stored job to its caller-facing shape. No side effects.
pub fn project(
    job: &FittingJob,
    limits: &FittingLimits,
    result_base_url: &str,
) -> Result<JobStatusPayload, FittingError> {
    let payload = match job.state {
        JobState::Processing => JobStatusPayload::Processing {
            id: job.id,
            current_step: job.current_step,
        },
        JobState::Completed => {
            let key = job
                .result_reference
                .as_deref()
                .ok_or(FittingError::JobNotFound)?;
            let completed_at = job.finished_at.unwrap_or(job.created_at);
            let elapsed = completed_at - job.created_at;
            let seconds = match elapsed.num_microseconds() {
                Some(micros) => micros.max(0) as f64 / 1_000_000.0,
                None => elapsed.num_seconds().max(0) as f64,
            };

            JobStatusPayload::Completed {
                id: job.id,
                result_reference: public_url(result_base_url, key),
                caption: job
                    .caption
                    .clone()
                    .unwrap_or_else(|| FALLBACK_CAPTION.to_string()),
                completed_at,
                processing_time_seconds: seconds,
            }
        }
        JobState::Failed => JobStatusPayload::Failed {
            id: job.id,
            error_message: match job.failed_step {
                Some(step) => format!("Error while fitting the {}", step.garment_name()),
                None => GENERIC_FAILURE.to_string(),
            },
            failed_step: job.failed_step,
            failed_at: job.finished_at,
        },
        JobState::Timeout => JobStatusPayload::Timeout {
            id: job.id,
            error_message: format!(
                "Processing exceeded the time limit ({} seconds)",
                limits.deadline.as_secs()
            ),
            timeout_at: job.finished_at,
        },
    };

    Ok(payload)
}

/// Join a stored object key onto the public base URL. Absolute URLs pass through.
pub fn public_url(base: &str, key: &str) -> String {
    if key.starts_with("http://") || key.starts_with("https://") || base.is_empty() {
        return key.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}
