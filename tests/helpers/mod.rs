//! Test helper utilities for E2E testing

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Response from POST /api/v1/scans
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    pub state: String,
    pub message: String,
}

/// Response from GET /api/v1/scans/{id}
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: Uuid,
    pub url: String,
    pub state: String,
    pub result: Option<serde_json::Value>,
    pub error_code: Option<String>,
    pub error: Option<String>,
}

/// Submit a scan to the running server
pub async fn submit_scan(
    client: &reqwest::Client,
    base_url: &str,
    url: &str,
    requester: &str,
) -> Result<SubmitResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/v1/scans", base_url))
        .json(&serde_json::json!({
            "url": url,
            "requester": requester,
        }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Submit failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<SubmitResponse>().await?)
}

/// Poll scan status until completed or failed (with timeout)
pub async fn poll_scan_status(
    client: &reqwest::Client,
    base_url: &str,
    id: Uuid,
    timeout_secs: u64,
) -> Result<StatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/scans/{}", base_url, id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<StatusResponse>().await?;

        match status_response.state.as_str() {
            "completed" | "failed" => return Ok(status_response),
            "pending" | "running" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            other => {
                return Err(format!("Unknown scan state: {}", other).into());
            }
        }
    }

    Err(format!("Scan did not complete within {} seconds", timeout_secs).into())
}
