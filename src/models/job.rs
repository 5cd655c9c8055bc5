use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Body region a garment is composited onto. At most one item per category per job.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    Top,
    Bottom,
    Outer,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Human-readable garment name used in caller-facing messages.
    pub fn garment_name(self) -> &'static str {
        match self {
            Category::Top => "top",
            Category::Bottom => "bottoms",
            Category::Outer => "outerwear",
        }
    }
}

/// Lifecycle state of a fitting job.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Processing)
    }
}

/// One fitting request and its lifecycle record.
///
/// Invariants kept by the job store:
/// - at most one of `current_step` / `failed_step` is set
/// - `finished_at` is `None` iff `state == Processing`
/// - `result_reference` is `Some` iff `state == Completed`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FittingJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub state: JobState,
    pub current_step: Option<Category>,
    pub failed_step: Option<Category>,
    pub caption: Option<String>,
    pub result_reference: Option<String>,
    /// Base photo snapshotted at creation so the pipeline needs only the job id.
    pub photo_reference: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A garment to composite, in caller-supplied order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FittingItem {
    pub item_id: i64,
    pub category: Category,
    pub garment_reference: String,
}

/// Input for creating a job row.
#[derive(Debug, Clone)]
pub struct NewFittingJob {
    pub owner_id: Uuid,
    pub photo_reference: String,
    pub items: Vec<FittingItem>,
}
