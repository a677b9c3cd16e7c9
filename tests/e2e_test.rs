//! End-to-end tests against a running watchdog-scan server.
//!
//! Requires the server, its database, result storage, and a reachable
//! external scanner. Base URL comes from E2E_BASE_URL (default
//! http://localhost:3000).

mod helpers;

use helpers::{poll_scan_status, submit_scan};

fn base_url() -> String {
    std::env::var("E2E_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

#[tokio::test]
#[ignore] // Run with: cargo test --test e2e_test -- --ignored
async fn test_submit_dedup_and_terminal_state() {
    let client = reqwest::Client::new();
    let base = base_url();

    // Unique subject per run so the dedup ledger starts clean.
    let subject = format!("https://e2e-{}.example.com", uuid::Uuid::new_v4());

    // Submission returns promptly with a pending job.
    let first = submit_scan(&client, &base, &subject, "e2e-user")
        .await
        .expect("submit failed");
    assert_eq!(first.state, "pending");

    // An immediate resubmission of the same pair yields the same id.
    let second = submit_scan(&client, &base, &subject, "e2e-user")
        .await
        .expect("resubmit failed");
    assert_eq!(second.id, first.id);
    assert!(second.state == "pending" || second.state == "running");

    // The job settles into a terminal state within the polling window.
    let terminal = poll_scan_status(&client, &base, first.id, 120)
        .await
        .expect("polling failed");

    match terminal.state.as_str() {
        "completed" => {
            assert!(terminal.result.is_some(), "completed scan must carry a report");
            assert!(terminal.error.is_none());
        }
        "failed" => {
            assert!(terminal.error_code.is_some(), "failed scan must carry a reason");
            assert!(terminal.result.is_none());
        }
        other => panic!("unexpected terminal state: {other}"),
    }

    println!(
        "  ✓ {} reached {} (id {})",
        subject, terminal.state, terminal.id
    );
}

#[tokio::test]
#[ignore]
async fn test_validation_rejects_bad_subjects() {
    let client = reqwest::Client::new();
    let base = base_url();

    for bad in ["not-a-url", "ftp://example.com", ""] {
        let response = client
            .post(format!("{}/api/v1/scans", base))
            .json(&serde_json::json!({ "url": bad, "requester": "e2e-user" }))
            .send()
            .await
            .expect("request failed");

        assert_eq!(
            response.status(),
            reqwest::StatusCode::BAD_REQUEST,
            "subject {bad:?} should be rejected"
        );

        let body: serde_json::Value = response.json().await.expect("error body");
        assert!(body.get("error").is_some());
    }
}

#[tokio::test]
#[ignore]
async fn test_unknown_id_is_404() {
    let client = reqwest::Client::new();
    let base = base_url();

    let response = client
        .get(format!("{}/api/v1/scans/{}", base, uuid::Uuid::new_v4()))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
