use axum::extract::{Path, Query, State};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{
    ListScansParams, ScanListItem, ScanStatusResponse, SubmitScanRequest, SubmitScanResponse,
};
use crate::models::job::{JobState, NewScanJob};
use crate::routes::ApiError;
use crate::services::orchestrator::CancelOutcome;

/// POST /api/v1/scans — submit a target for scanning.
///
/// Returns the job id immediately; all downstream outcomes are observed via
/// the status endpoint. Resubmitting while a job for the same
/// (url, requester) pair is non-terminal returns that job's id.
pub async fn submit_scan(
    State(state): State<AppState>,
    Json(req): Json<SubmitScanRequest>,
) -> Result<Json<SubmitScanResponse>, ApiError> {
    req.validate()
        .map_err(|report| ApiError::BadRequest(report.to_string()))?;

    let outcome = state
        .orchestrator
        .submit(NewScanJob {
            url: req.url,
            scan_type: req.scan_type,
            requester: req.requester,
        })
        .await?;

    let message = if outcome.deduplicated {
        "scan already in progress for this target"
    } else {
        "scan started"
    };

    Ok(Json(SubmitScanResponse {
        id: outcome.job.id,
        state: outcome.job.state,
        message: message.to_string(),
    }))
}

/// GET /api/v1/scans/{id} — current projection of a scan job.
///
/// For completed jobs the report payload is loaded from the result sink and
/// embedded in the response.
pub async fn get_scan_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScanStatusResponse>, ApiError> {
    let job = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no scan with id {id}")))?;

    let result = if job.state == JobState::Completed {
        match state.sink.fetch(id).await? {
            Some(bytes) => Some(serde_json::from_slice(&bytes).map_err(|e| {
                ApiError::Internal(format!("stored report is unreadable: {e}"))
            })?),
            None => {
                return Err(ApiError::Internal(format!(
                    "report for completed scan {id} is missing from storage"
                )))
            }
        }
    } else {
        None
    };

    Ok(Json(ScanStatusResponse::from_job(job, result)))
}

/// GET /api/v1/scans?requester=… — scan history, newest first.
pub async fn list_scans(
    State(state): State<AppState>,
    Query(params): Query<ListScansParams>,
) -> Result<Json<Vec<ScanListItem>>, ApiError> {
    let jobs = state.store.list_for_requester(&params.requester).await?;
    Ok(Json(jobs.into_iter().map(ScanListItem::from).collect()))
}

/// POST /api/v1/scans/{id}/cancel — best-effort cancellation.
pub async fn cancel_scan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScanStatusResponse>, ApiError> {
    match state.orchestrator.cancel(id).await? {
        CancelOutcome::Cancelled(job) => Ok(Json(ScanStatusResponse::from_job(job, None))),
        CancelOutcome::AlreadyTerminal(job) => Err(ApiError::Conflict(format!(
            "scan is already {}",
            job.state
        ))),
    }
}
