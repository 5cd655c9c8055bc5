use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{Category, JobState};

/// Request to start a fitting job.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FittingRequest {
    #[garde(dive)]
    pub items: Vec<FittingItemRequest>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FittingItemRequest {
    #[garde(range(min = 1))]
    pub item_id: i64,

    /// Kept as text so an unknown category maps to its own error code.
    #[garde(length(min = 1, max = 20))]
    pub category: String,
}

/// Response after a fitting job was accepted.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FittingAccepted {
    pub job_id: Uuid,
    pub status: JobState,
    pub current_step: Option<Category>,
    pub created_at: DateTime<Utc>,
}

/// Caller-facing view of a job, one shape per state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatusPayload {
    #[serde(rename_all = "camelCase")]
    Processing {
        id: Uuid,
        current_step: Option<Category>,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        id: Uuid,
        result_reference: String,
        caption: String,
        completed_at: DateTime<Utc>,
        processing_time_seconds: f64,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        id: Uuid,
        error_message: String,
        failed_step: Option<Category>,
        failed_at: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    Timeout {
        id: Uuid,
        error_message: String,
        timeout_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Deserialize, Validate)]
pub struct HistoryQuery {
    #[garde(range(min = 1))]
    #[serde(default = "default_page")]
    pub page: i64,

    #[garde(range(min = 1, max = 50))]
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub item_id: i64,
    pub category: Category,
    /// `None` once the item has left the catalog.
    pub name: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub job_id: Uuid,
    pub status: JobState,
    pub result_reference: Option<String>,
    pub items: Vec<HistoryItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_items: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub fittings: Vec<HistoryEntry>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub message: String,
    pub deleted_at: DateTime<Utc>,
}

/// Batch caption request for already-stored images.
#[derive(Debug, Deserialize, Validate)]
pub struct CaptionRequest {
    #[garde(length(min = 1, max = 50), inner(length(min = 1, max = 1024)))]
    pub references: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CaptionResult {
    pub reference: String,
    pub caption: Option<String>,
}
