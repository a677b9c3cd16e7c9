use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{FailureReason, JobState, ScanJob};
use crate::models::report::RiskSummary;

/// Request to submit a target for scanning.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitScanRequest {
    #[garde(length(min = 1, max = 2048), custom(is_scannable_url))]
    pub url: String,

    #[serde(default = "default_scan_type")]
    #[garde(length(min = 1, max = 64))]
    pub scan_type: String,

    #[garde(length(min = 1, max = 200))]
    pub requester: String,
}

fn default_scan_type() -> String {
    "full".to_string()
}

fn is_scannable_url(value: &str, _ctx: &()) -> garde::Result {
    let parsed =
        url::Url::parse(value).map_err(|_| garde::Error::new("not a valid URL"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(garde::Error::new("URL scheme must be http or https"));
    }
    if parsed.host_str().is_none() {
        return Err(garde::Error::new("URL must have a host"));
    }
    Ok(())
}

/// Response after submitting a scan.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitScanResponse {
    pub id: Uuid,
    pub state: JobState,
    pub message: String,
}

/// Full projection of a job, returned by the status endpoint. The report
/// payload is present only for completed jobs.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanStatusResponse {
    pub id: Uuid,
    pub url: String,
    pub scan_type: String,
    pub requester: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<RiskSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanStatusResponse {
    pub fn from_job(job: ScanJob, result: Option<serde_json::Value>) -> Self {
        Self {
            id: job.id,
            url: job.url,
            scan_type: job.scan_type,
            requester: job.requester,
            state: job.state,
            result,
            result_summary: job.result_summary,
            error_code: job.error_code,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Scan-history listing parameters.
#[derive(Debug, Deserialize)]
pub struct ListScansParams {
    pub requester: String,
}

/// One row of the scan-history listing (no report payload).
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanListItem {
    pub id: Uuid,
    pub url: String,
    pub scan_type: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<RiskSummary>,
    pub created_at: DateTime<Utc>,
}

impl From<ScanJob> for ScanListItem {
    fn from(job: ScanJob) -> Self {
        Self {
            id: job.id,
            url: job.url,
            scan_type: job.scan_type,
            state: job.state,
            result_summary: job.result_summary,
            created_at: job.created_at,
        }
    }
}
