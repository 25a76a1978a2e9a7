//! Wire types shared by the sync services and the CLI
//!
//! Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::PimsyncError;

/// Header carrying the shared admin secret on every administrative call
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Body (or query) of a loader run request. Missing fields take the
/// loader's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// Aggregate counts of one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    /// Records parsed inside the window (parse failures excluded)
    pub total_records: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Wall time in milliseconds
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResponse {
    pub success: bool,
    pub stats: PipelineStats,
    pub next_offset: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResponse {
    pub success: bool,
    pub bytes_uploaded: u64,
    /// Megabytes rendered with two decimals, e.g. "12.40"
    #[serde(rename = "fileSizeMB")]
    pub file_size_mb: String,
    pub completed_at: DateTime<Utc>,
    pub object_key: String,
    pub sha256: String,
    pub resumed: bool,
}

/// Loader status, as returned by `GET /loader/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderStatus {
    pub is_processing: bool,
    pub last_run: Option<LoaderRun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderRun {
    pub offset: u64,
    pub limit: u64,
    pub stats: PipelineStats,
    pub finished_at: DateTime<Utc>,
}

/// Body of `POST /orchestrator/sync`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Skip extraction and start loading at this line offset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from: Option<u64>,
    /// Skip extraction and load the existing blob from offset 0
    #[serde(default)]
    pub skip_fetch: bool,
}

/// Phase of the orchestrator's sync state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Fetching,
    Processing,
    Completed,
    Failed,
}

impl SyncPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncPhase::Completed | SyncPhase::Failed)
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Processing => "processing",
            SyncPhase::Completed => "completed",
            SyncPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SyncPhase {
    type Err = PimsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncPhase::Idle),
            "fetching" => Ok(SyncPhase::Fetching),
            "processing" => Ok(SyncPhase::Processing),
            "completed" => Ok(SyncPhase::Completed),
            "failed" => Ok(SyncPhase::Failed),
            other => Err(PimsyncError::InvalidPhase(other.to_string())),
        }
    }
}

/// One entry of the sync error log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorEntry {
    pub phase: SyncPhase,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Attempts made before giving up; 1 means no retry happened
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub fetched: bool,
    pub chunks_processed: u64,
    pub total_records: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub record_errors: u64,
    pub current_offset: u64,
    pub errors: Vec<SyncErrorEntry>,
}

/// Snapshot of the orchestrator's state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_running: bool,
    pub run_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_phase: SyncPhase,
    /// Line offset an operator can resume from after a failed load phase
    pub resume_offset: Option<u64>,
    pub progress: SyncProgress,
}

/// `GET /orchestrator/status` body: the snapshot plus process uptime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: SyncStatus,
    /// Seconds since the process started
    pub uptime: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTriggerResponse {
    pub message: String,
    pub status: SyncStatus,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_request_accepts_empty_body() {
        let req: LoadRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(req, LoadRequest::default());

        let req: LoadRequest = serde_json::from_value(json!({"offset": 20000, "limit": 500})).unwrap();
        assert_eq!(req.offset, Some(20000));
        assert_eq!(req.limit, Some(500));
    }

    #[test]
    fn test_load_response_uses_camel_case() {
        let resp = LoadResponse {
            success: true,
            stats: PipelineStats { total_records: 3, ..Default::default() },
            next_offset: 10,
            has_more: false,
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["nextOffset"], 10);
        assert_eq!(value["hasMore"], false);
        assert_eq!(value["stats"]["totalRecords"], 3);
    }

    #[test]
    fn test_stage_response_file_size_field_name() {
        let resp = StageResponse {
            success: true,
            bytes_uploaded: 1024,
            file_size_mb: "0.00".to_string(),
            completed_at: Utc::now(),
            object_key: "latest.ndjson".to_string(),
            sha256: String::new(),
            resumed: false,
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("fileSizeMB").is_some());
        assert_eq!(value["bytesUploaded"], 1024);
    }

    #[test]
    fn test_sync_phase_terminal_states() {
        assert!(SyncPhase::Completed.is_terminal());
        assert!(SyncPhase::Failed.is_terminal());
        assert!(!SyncPhase::Processing.is_terminal());
        assert_eq!("fetching".parse::<SyncPhase>().unwrap(), SyncPhase::Fetching);
        assert!("paused".parse::<SyncPhase>().is_err());
    }

    #[test]
    fn test_status_response_flattens_snapshot() {
        let resp = StatusResponse { status: SyncStatus::default(), uptime: 42 };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["currentPhase"], "idle");
        assert_eq!(value["isRunning"], false);
        assert_eq!(value["uptime"], 42);
    }
}
