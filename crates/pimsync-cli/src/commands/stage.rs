//! `pimsync stage` command implementation

use crate::client::ApiClient;
use crate::error::Result;
use crate::output;

/// Run the stager once and wait for the upload to finish
pub async fn run(client: &ApiClient, json: bool) -> Result<()> {
    let response = client.stage().await?;

    if json {
        output::print_json(&response)
    } else {
        println!("{}", output::format_stage(&response));
        Ok(())
    }
}
