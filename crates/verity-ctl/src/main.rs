//! verity-ctl — command-line client for verityd.

use std::sync::Arc;

use anyhow::{Context, Result};

use verity_core::config::VerityConfig;
use verity_core::crypto::{ChaChaCipher, Cipher};
use verity_services::TransferClient;

mod cmd;

fn print_usage() {
    println!("Usage: verity-ctl [--addr <host:port>] <command>");
    println!();
    println!("Commands:");
    println!("  upload <path> [--name <name>]   Upload a text file and report verification");
    println!("  download <name> [--out <dir>]   Download a file and verify it locally");
    println!("  list                            List files stored on the server");
    println!("  keygen                          Print a new base64 shared key");
    println!();
    println!("Options:");
    println!("  --addr <host:port>   Server address (default: 127.0.0.1:<network.port>)");
    println!();
    println!("The shared key comes from crypto.key / crypto.key_path in the config file");
    println!("or from VERITY_KEY.");
}

fn client(config: &VerityConfig, addr: Option<String>) -> Result<TransferClient> {
    let key = config.load_key().context("no usable shared key")?;
    let cipher: Arc<dyn Cipher> = Arc::new(ChaChaCipher::new(&key));
    let addr = addr.unwrap_or_else(|| format!("127.0.0.1:{}", config.network.port));
    Ok(TransferClient::new(addr, cipher, config.channel_config()))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse options
    let mut addr: Option<String> = None;
    let mut name: Option<String> = None;
    let mut out: Option<String> = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" => {
                i += 1;
                addr = Some(args.get(i).context("--addr requires a value")?.clone());
            }
            "--name" => {
                i += 1;
                name = Some(args.get(i).context("--name requires a value")?.clone());
            }
            "--out" => {
                i += 1;
                out = Some(args.get(i).context("--out requires a value")?.clone());
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    if let ["keygen"] = remaining.as_slice() {
        return cmd::keygen::cmd_keygen();
    }

    let config = VerityConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        VerityConfig::default()
    });

    match remaining.as_slice() {
        ["upload", path] => cmd::upload::cmd_upload(&client(&config, addr)?, path, name.as_deref()).await,
        ["download", file] => cmd::download::cmd_download(&client(&config, addr)?, file, out.as_deref()).await,
        ["list"] => cmd::list::cmd_list(&client(&config, addr)?).await,
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
