//! Upload command.

use anyhow::{Context, Result};

use verity_services::TransferClient;

pub async fn cmd_upload(client: &TransferClient, path: &str, name: Option<&str>) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read file: {}", path))?;

    let filename = match name {
        Some(n) => n.to_string(),
        None => std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .context("path has no usable file name, pass --name")?
            .to_string(),
    };

    let report = client
        .upload(&filename, &data)
        .await
        .with_context(|| format!("upload to {} failed", client.addr()))?;

    println!("  File     : {}", filename);
    println!("  Bytes    : {}", data.len());
    println!("  Encoding : {}", report.encoding.as_str());
    println!("  Digest   : {}", report.digest);
    println!("  Verified : {}", if report.verified { "yes" } else { "NO" });
    println!("  Server   : {}", report.status);

    if !report.verified {
        anyhow::bail!("server could not verify {}", filename);
    }
    Ok(())
}
