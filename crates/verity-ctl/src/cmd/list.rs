//! List command.

use anyhow::{Context, Result};

use verity_services::TransferClient;

pub async fn cmd_list(client: &TransferClient) -> Result<()> {
    let names = client
        .list()
        .await
        .with_context(|| format!("failed to list files on {}", client.addr()))?;

    if names.is_empty() {
        println!("No files stored.");
        return Ok(());
    }
    for name in &names {
        println!("  {}", name);
    }
    println!();
    println!("  {} file(s)", names.len());
    Ok(())
}
