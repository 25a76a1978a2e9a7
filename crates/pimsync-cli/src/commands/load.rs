//! `pimsync load` command implementation
//!
//! Processes one window of the staged catalog and prints where the next
//! window starts.

use pimsync_common::types::LoadRequest;

use crate::client::ApiClient;
use crate::error::Result;
use crate::output;

pub async fn run(
    client: &ApiClient,
    offset: Option<u64>,
    limit: Option<u64>,
    json: bool,
) -> Result<()> {
    let response = client.load(&LoadRequest { offset, limit }).await?;

    if json {
        return output::print_json(&response);
    }

    println!("{}", output::format_stats(&response.stats));
    if response.has_more {
        println!("Next window: pimsync load --offset {}", response.next_offset);
    } else {
        println!("End of catalog reached");
    }
    Ok(())
}
