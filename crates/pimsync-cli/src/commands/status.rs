//! `pimsync status` command implementation
//!
//! Shows the orchestrator's phase, progress and error log. With `--expect`
//! the command fails when the orchestrator is in any other phase, so scripts
//! can gate on a finished sync.

use pimsync_common::types::SyncPhase;

use crate::client::ApiClient;
use crate::error::{CliError, Result};
use crate::output;

pub async fn run(client: &ApiClient, expect: Option<SyncPhase>, json: bool) -> Result<()> {
    let response = client.status().await?;

    if json {
        output::print_json(&response)?;
    } else {
        println!("{}", output::format_status(&response));
    }

    match expect {
        Some(expected) if response.status.current_phase != expected => {
            Err(CliError::UnexpectedPhase {
                expected,
                actual: response.status.current_phase,
            })
        }
        _ => Ok(()),
    }
}
