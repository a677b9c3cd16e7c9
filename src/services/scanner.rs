use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::models::report::ScanReport;
use crate::services::retry::{retry_with_backoff, RetryPolicy};

/// Parameters for starting an external scan.
#[derive(Debug, Clone)]
pub struct StartScan {
    pub job_id: Uuid,
    pub url: String,
    pub scan_type: String,
}

/// Outcome of polling the external scanner for a running scan.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Scan still in progress.
    Pending,
    /// Scan finished; the report payload is final.
    Done(ScanReport),
    /// The scanner itself reported the scan as failed. Terminal.
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ScanClientError {
    /// The scanner rejected the request (malformed subject, bad credentials,
    /// quota). Never retried.
    #[error("scanner rejected the request: {0}")]
    Rejected(String),

    /// Network-level failure or scanner-side outage. Retried with backoff.
    #[error("scanner unavailable: {0}")]
    Unavailable(String),

    /// The scanner answered with something we cannot interpret.
    #[error("unexpected scanner response: {0}")]
    Malformed(String),
}

impl ScanClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ScanClientError::Unavailable(_))
    }
}

/// The external scanner boundary: start a scan, poll it by handle, and
/// best-effort cancel. Implementations own their retry policy; callers see
/// only the final outcome of each call.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    async fn start(&self, req: &StartScan) -> Result<String, ScanClientError>;

    async fn poll(&self, external_ref: &str) -> Result<PollOutcome, ScanClientError>;

    async fn cancel(&self, external_ref: &str) -> Result<(), ScanClientError>;

    /// Reachability probe for health checks.
    async fn health(&self) -> Result<(), ScanClientError> {
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponseBody {
    scan_ref: Option<String>,
}

#[derive(Deserialize)]
struct PollResponseBody {
    status: String,
    report: Option<ScanReport>,
    error: Option<String>,
}

/// HTTP client for the hosted scanner service. Authenticates with a shared
/// secret header; every request carries a bounded timeout.
pub struct HttpScannerClient {
    http: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl HttpScannerClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        request_timeout: Duration,
    ) -> Result<Self, ScanClientError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ScanClientError::Malformed(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            retry: RetryPolicy::scanner(),
        })
    }

    async fn start_once(&self, req: &StartScan) -> Result<String, ScanClientError> {
        let body = serde_json::json!({
            "url": req.url,
            "scanType": req.scan_type,
            "scanId": req.job_id,
        });

        let response = self
            .http
            .post(format!("{}/scan", self.base_url))
            .header("X-Scanner-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.text().await.ok()));
        }

        let parsed: StartResponseBody = response
            .json()
            .await
            .map_err(|e| ScanClientError::Malformed(e.to_string()))?;

        // Some scanner deployments do not issue their own handle; the job id
        // doubles as one.
        Ok(parsed.scan_ref.unwrap_or_else(|| req.job_id.to_string()))
    }

    async fn poll_once(&self, external_ref: &str) -> Result<PollOutcome, ScanClientError> {
        let response = self
            .http
            .get(format!("{}/scan/{}/status", self.base_url, external_ref))
            .header("X-Scanner-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.text().await.ok()));
        }

        let parsed: PollResponseBody = response
            .json()
            .await
            .map_err(|e| ScanClientError::Malformed(e.to_string()))?;

        outcome_from_body(parsed)
    }
}

#[async_trait]
impl ScanBackend for HttpScannerClient {
    async fn start(&self, req: &StartScan) -> Result<String, ScanClientError> {
        retry_with_backoff(
            &self.retry,
            "scanner_start",
            || self.start_once(req),
            ScanClientError::is_transient,
        )
        .await
    }

    async fn poll(&self, external_ref: &str) -> Result<PollOutcome, ScanClientError> {
        retry_with_backoff(
            &self.retry,
            "scanner_poll",
            || self.poll_once(external_ref),
            ScanClientError::is_transient,
        )
        .await
    }

    async fn cancel(&self, external_ref: &str) -> Result<(), ScanClientError> {
        let response = self
            .http
            .post(format!("{}/scan/{}/cancel", self.base_url, external_ref))
            .header("X-Scanner-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.text().await.ok()));
        }
        Ok(())
    }

    async fn health(&self) -> Result<(), ScanClientError> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(request_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ScanClientError::Unavailable(format!(
                "health endpoint returned {}",
                response.status()
            )))
        }
    }
}

fn request_error(err: reqwest::Error) -> ScanClientError {
    ScanClientError::Unavailable(err.to_string())
}

fn status_error(status: StatusCode, body: Option<String>) -> ScanClientError {
    let detail = body
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| status.to_string());

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        ScanClientError::Unavailable(detail)
    } else {
        ScanClientError::Rejected(detail)
    }
}

fn outcome_from_body(body: PollResponseBody) -> Result<PollOutcome, ScanClientError> {
    match body.status.as_str() {
        "queued" | "pending" | "running" => Ok(PollOutcome::Pending),
        "completed" => match body.report {
            Some(report) => Ok(PollOutcome::Done(report)),
            None => Err(ScanClientError::Malformed(
                "completed status without a report".to_string(),
            )),
        },
        "failed" => Ok(PollOutcome::Failed(
            body.error.unwrap_or_else(|| "scan failed".to_string()),
        )),
        other => Err(ScanClientError::Malformed(format!(
            "unknown scan status '{other}'"
        ))),
    }
}
