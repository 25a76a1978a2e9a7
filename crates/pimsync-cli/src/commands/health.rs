//! `pimsync health` command implementation

use crate::client::ApiClient;
use crate::error::{CliError, Result};

pub async fn run(client: &ApiClient, json: bool) -> Result<()> {
    let healthy = client.health_check().await?;

    if json {
        println!("{}", serde_json::json!({ "healthy": healthy }));
    } else if healthy {
        println!("Server is up");
    }

    if healthy {
        Ok(())
    } else {
        Err(CliError::Unreachable(client.base_url().to_string()))
    }
}
