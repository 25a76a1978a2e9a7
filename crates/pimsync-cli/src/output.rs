//! Human-readable rendering of server responses
//!
//! `--json` bypasses this module and prints the response as received.

use pimsync_common::types::{PipelineStats, StageResponse, StatusResponse, SyncStatus};
use serde::Serialize;
use std::fmt::Write;

use crate::error::Result;

/// Print any response as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn format_stats(stats: &PipelineStats) -> String {
    format!(
        "{} records: {} inserted, {} updated, {} skipped, {} errors ({} ms)",
        stats.total_records, stats.inserted, stats.updated, stats.skipped, stats.errors, stats.duration
    )
}

pub fn format_stage(response: &StageResponse) -> String {
    let mut out = format!(
        "Staged {} ({} MB) at {}\n  sha256: {}",
        response.object_key, response.file_size_mb, response.completed_at, response.sha256
    );
    if response.resumed {
        out.push_str("\n  resumed an interrupted upload");
    }
    out
}

pub fn format_sync_status(status: &SyncStatus) -> String {
    let progress = &status.progress;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Phase:    {}{}",
        status.current_phase,
        if status.is_running { " (running)" } else { "" }
    );
    if let Some(run_id) = status.run_id {
        let _ = writeln!(out, "Run:      {}", run_id);
    }
    if let Some(start) = status.start_time {
        let _ = writeln!(out, "Started:  {}", start);
    }
    if let Some(done) = status.completed_at {
        let _ = writeln!(out, "Finished: {}", done);
    }
    let _ = writeln!(
        out,
        "Progress: {} chunks, offset {}, {} records ({} inserted, {} updated, {} skipped, {} errors)",
        progress.chunks_processed,
        progress.current_offset,
        progress.total_records,
        progress.inserted,
        progress.updated,
        progress.skipped,
        progress.record_errors
    );
    if let Some(offset) = status.resume_offset {
        let _ = writeln!(out, "Resume:   pimsync sync --resume-from {}", offset);
    }
    for error in &progress.errors {
        let at = error
            .offset
            .map(|o| format!(" at offset {}", o))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "Error:    [{}{}] {} (after {} attempts)",
            error.phase, at, error.detail, error.attempts
        );
    }

    out.trim_end().to_string()
}

pub fn format_status(response: &StatusResponse) -> String {
    format!("{}\nUptime:   {}s", format_sync_status(&response.status), response.uptime)
}
