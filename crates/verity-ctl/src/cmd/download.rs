//! Download command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use verity_services::{TransferClient, TransferError};

pub async fn cmd_download(client: &TransferClient, name: &str, out_dir: Option<&str>) -> Result<()> {
    let report = match client.download(name).await {
        Ok(r) => r,
        Err(TransferError::NotFound(_)) => {
            eprintln!("{} does not exist on the server", name);
            std::process::exit(2);
        }
        Err(e) => return Err(e).with_context(|| format!("download from {} failed", client.addr())),
    };

    let dir = PathBuf::from(out_dir.unwrap_or("."));
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let local = std::path::Path::new(name)
        .file_name()
        .context("server returned an unusable file name")?;
    let path = dir.join(local);
    tokio::fs::write(&path, report.text.as_bytes())
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("  Saved    : {}", path.display());
    println!("  Bytes    : {}", report.text.len());
    println!("  Digest   : {}", report.digest);
    println!("  Verified : {}", if report.verified { "yes" } else { "NO" });

    if !report.verified {
        anyhow::bail!("{} failed integrity verification", name);
    }
    Ok(())
}
