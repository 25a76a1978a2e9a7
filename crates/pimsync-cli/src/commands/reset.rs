//! `pimsync reset` command implementation
//!
//! Clears the in-progress flag of a service whose run died without
//! releasing it.

use crate::client::ApiClient;
use crate::error::Result;
use crate::output;
use crate::ResetTarget;

pub async fn run(client: &ApiClient, target: ResetTarget, json: bool) -> Result<()> {
    let response = client.reset(target).await?;

    if json {
        return output::print_json(&response);
    }

    let flag = match target {
        ResetTarget::Loader => "wasProcessing",
        ResetTarget::Orchestrator => "wasRunning",
    };
    let was_busy = response.get(flag).and_then(|v| v.as_bool()).unwrap_or(false);

    if was_busy {
        println!("Reset {:?}: cleared a run in progress", target);
    } else {
        println!("Reset {:?}: nothing was running", target);
    }
    Ok(())
}
