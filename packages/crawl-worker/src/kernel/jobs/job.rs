//! Crawl job model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::error::JobError;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "crawl_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    /// Whether the job has reached `done` or `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal worker transition.
    ///
    /// Only queued -> running and running -> {done, failed} are allowed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

// ============================================================================
// Params
// ============================================================================

/// Crawl parameters as stored in the `params` JSONB column.
///
/// Every key is optional; missing keys fall back to [`CrawlDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
}

/// Values substituted for absent [`CrawlParams`] keys.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlDefaults {
    pub max_pages: i64,
    pub rate: f64,
    pub start_url: String,
}

impl Default for CrawlDefaults {
    fn default() -> Self {
        Self {
            max_pages: 5000,
            rate: 0.8,
            start_url: "https://example.org/".to_string(),
        }
    }
}

// ============================================================================
// CrawlJob Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct CrawlJob {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    /// Business identifier, also the name of the job's working directory.
    pub job_id: String,

    #[builder(default)]
    pub status: JobStatus,

    // Raw JSON so a malformed payload fails the job instead of the claim
    #[builder(default = serde_json::json!({}))]
    pub params: serde_json::Value,

    // Ownership
    #[builder(default, setter(strip_option))]
    pub locked_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub locked_by: Option<String>,

    // Execution
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub ended_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub pid: Option<i32>,
    #[builder(default, setter(strip_option))]
    pub exit_code: Option<i32>,
    #[builder(default, setter(strip_option))]
    pub log_path: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl CrawlJob {
    /// Create a queued job the way an external producer would.
    pub fn queued(job_id: impl Into<String>, params: serde_json::Value) -> Self {
        Self::builder().job_id(job_id.into()).params(params).build()
    }

    /// Decode the `params` payload.
    pub fn crawl_params(&self) -> Result<CrawlParams, JobError> {
        if self.params.is_null() {
            return Ok(CrawlParams::default());
        }
        serde_json::from_value(self.params.clone()).map_err(JobError::InvalidParams)
    }
}
