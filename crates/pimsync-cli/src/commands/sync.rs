//! `pimsync sync` command implementation
//!
//! Starts a sync on the orchestrator. With `--wait` the command polls the
//! status endpoint until the run reaches a terminal phase and fails when the
//! sync failed, printing the offset to resume from.

use pimsync_common::types::{SyncPhase, SyncRequest, SyncStatus};
use std::time::Duration;
use tracing::debug;

use crate::client::ApiClient;
use crate::error::{CliError, Result};
use crate::output;

pub async fn run(
    client: &ApiClient,
    request: SyncRequest,
    wait: bool,
    interval: Duration,
    json: bool,
) -> Result<()> {
    let response = client.trigger_sync(&request).await?;

    if json {
        output::print_json(&response)?;
    } else {
        println!("{}", response.message);
    }

    if !wait {
        return Ok(());
    }

    let status = wait_for_completion(client, interval).await?;

    if json {
        output::print_json(&status)?;
    } else {
        println!("{}", output::format_sync_status(&status));
    }

    match status.current_phase {
        SyncPhase::Failed => Err(CliError::SyncFailed(failure_summary(&status))),
        _ => Ok(()),
    }
}

/// Poll until the orchestrator stops running
async fn wait_for_completion(client: &ApiClient, interval: Duration) -> Result<SyncStatus> {
    loop {
        tokio::time::sleep(interval).await;

        let response = client.status().await?;
        let status = response.status;
        debug!(
            phase = %status.current_phase,
            offset = status.progress.current_offset,
            "Polled sync status"
        );

        if !status.is_running && status.current_phase.is_terminal() {
            return Ok(status);
        }
    }
}

fn failure_summary(status: &SyncStatus) -> String {
    let last = status
        .progress
        .errors
        .last()
        .map(|e| e.detail.clone())
        .unwrap_or_else(|| "no error recorded".to_string());

    match status.resume_offset {
        Some(offset) => format!("{}. Resume with 'pimsync sync --resume-from {}'", last, offset),
        None => last,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn status_body(phase: &str, running: bool, resume: Option<u64>, errors: Value) -> Value {
        json!({
            "isRunning": running,
            "runId": null,
            "startTime": null,
            "completedAt": null,
            "currentPhase": phase,
            "resumeOffset": resume,
            "progress": {
                "fetched": true,
                "chunksProcessed": 2,
                "totalRecords": 40000,
                "inserted": 40000,
                "updated": 0,
                "skipped": 0,
                "recordErrors": 0,
                "currentOffset": 40000,
                "errors": errors
            },
            "uptime": 5
        })
    }

    async fn started(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/orchestrator/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "Sync started",
                "status": status_body("fetching", true, None, json!([])),
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_wait_until_completed() {
        let server = MockServer::start().await;
        started(&server).await;
        Mock::given(method("GET"))
            .and(path("/orchestrator/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(status_body("processing", true, None, json!([]))),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orchestrator/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(status_body("completed", false, None, json!([]))),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri(), Some("secret".to_string())).unwrap();
        run(&client, SyncRequest::default(), true, Duration::ZERO, false)
            .await
            .unwrap();

        let polls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/orchestrator/status")
            .count();
        assert_eq!(polls, 3);
    }

    #[tokio::test]
    async fn test_wait_reports_resume_offset_on_failure() {
        let server = MockServer::start().await;
        started(&server).await;
        Mock::given(method("GET"))
            .and(path("/orchestrator/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body(
                "failed",
                false,
                Some(40000),
                json!([{
                    "phase": "processing",
                    "detail": "loader returned 500",
                    "offset": 40000,
                    "attempts": 4,
                    "timestamp": "2026-01-18T10:00:00Z"
                }]),
            )))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri(), None).unwrap();
        let err = run(&client, SyncRequest::default(), true, Duration::ZERO, true)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Sync failed: loader returned 500. Resume with 'pimsync sync --resume-from 40000'"
        );
    }

    #[tokio::test]
    async fn test_no_wait_returns_after_trigger() {
        let server = MockServer::start().await;
        started(&server).await;

        let client = ApiClient::new(server.uri(), None).unwrap();
        run(&client, SyncRequest { resume_from: None, skip_fetch: true }, false, Duration::ZERO, false)
            .await
            .unwrap();
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
