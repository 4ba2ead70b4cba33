//! End-to-end tests against a running deployment
//!
//! These tests require:
//! 1. PostgreSQL database running (with migrations applied)
//! 2. Redis running
//! 3. API server running on configured port
//! 4. Worker process running
//! 5. Cloudflare Workers AI and R2 credentials configured
//! 6. JWT_SECRET and CRON_SECRET matching the server
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:3000)

mod helpers;

use reqwest::multipart;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

use shelf_scan::auth::{AuthKeys, Claims};

fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

fn env_secret(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{} must be set for e2e tests", name))
}

fn user_token(owner: &str) -> String {
    let keys = AuthKeys::new(env_secret("JWT_SECRET"), env_secret("CRON_SECRET"));
    keys.issue_token(&Claims {
        sub: owner.to_string(),
        household_id: None,
        exp: chrono::Utc::now().timestamp() + 3600,
    })
    .expect("Failed to sign token")
}

async fn upload(client: &reqwest::Client, token: &str, bytes: Vec<u8>) -> reqwest::Response {
    let form = multipart::Form::new().part(
        "image",
        multipart::Part::bytes(bytes)
            .file_name("shelf.png")
            .mime_str("image/png")
            .unwrap(),
    );

    client
        .post(format!("{}/api/v1/detections", get_base_url()))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .expect("Upload request failed")
}

/// Poll until the job is terminal, for at most `timeout_secs`.
async fn poll_until_terminal(client: &reqwest::Client, token: &str, job_id: &str, timeout_secs: u64) -> Value {
    let max_attempts = timeout_secs * 2; // Poll every 500ms
    let mut last_progress = 0;

    for attempt in 0..max_attempts {
        let body: Value = client
            .get(format!("{}/api/v1/detections/{}", get_base_url(), job_id))
            .bearer_auth(token)
            .send()
            .await
            .expect("Poll request failed")
            .json()
            .await
            .expect("Poll response was not JSON");

        let progress = body["progress"].as_i64().unwrap_or(0);
        match body["status"].as_str() {
            Some("completed") | Some("failed") => return body,
            Some("processing") => {
                assert!(progress >= last_progress, "progress went backwards");
                last_progress = progress;
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{}, stage {})", attempt, max_attempts, body["stage"]);
                }
                sleep(Duration::from_millis(500)).await;
            }
            other => panic!("Unknown job status: {:?}", other),
        }
    }

    panic!("Job did not finish within {} seconds", timeout_secs);
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and all infrastructure
async fn test_e2e_health_check() {
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", get_base_url()))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and all infrastructure
async fn test_e2e_detection_reaches_terminal_state() {
    let client = reqwest::Client::new();
    let token = user_token("e2e-reader");

    let response = upload(&client, &token, helpers::png_bytes()).await;
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "processing");
    let job_id = body["jobId"].as_str().unwrap().to_string();
    println!("  ✓ Upload successful, job_id: {}", job_id);

    let job = poll_until_terminal(&client, &token, &job_id, 180).await;
    println!("  ✓ Job finished with status: {}", job["status"]);

    if job["status"] == "completed" {
        let count = job["result"]["count"].as_u64().unwrap();
        assert_eq!(count as usize, job["result"]["books"].as_array().unwrap().len());
        assert_eq!(job["progress"], 100);
    } else {
        // A blank test image usually ends in NO_BOOKS_DETECTED.
        assert!(job["errorCode"].is_string());
        assert!(job["canRetry"].is_boolean());
    }

    // Other callers never see the job.
    let other = user_token("e2e-stranger");
    let response = client
        .get(format!("{}/api/v1/detections/{}", get_base_url(), job_id))
        .bearer_auth(other)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore]
async fn test_e2e_maintenance_endpoints() {
    let client = reqwest::Client::new();
    let cron = env_secret("CRON_SECRET");

    for path in ["timeout-sweep", "retention-cleanup"] {
        let url = format!("{}/api/v1/maintenance/{}", get_base_url(), path);

        let denied = client.post(&url).send().await.unwrap();
        assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

        let allowed = client.post(&url).bearer_auth(&cron).send().await.unwrap();
        assert!(allowed.status().is_success());
        let report: Value = allowed.json().await.unwrap();
        println!("  ✓ {}: {}", path, report);
    }
}
