//! verityd — integrity-verified file transfer server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use verity_core::config::VerityConfig;
use verity_core::crypto::{ChaChaCipher, Cipher};
use verity_services::{
    AuditLog, CommandOracle, FileStore, RecoveryPolicy, SessionContext, SessionServer,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = VerityConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = VerityConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        VerityConfig::default()
    });

    // Key
    let key = config.load_key().context("cannot start without a shared key")?;
    let cipher: Arc<dyn Cipher> = Arc::new(ChaChaCipher::new(&key));
    drop(key);

    // Storage
    let store = FileStore::open(&config.storage.root)
        .context("failed to open storage root")?
        .with_list_extensions(config.storage.list_extensions.clone());
    tracing::info!(root = %config.storage.root.display(), "storage ready");

    // Audit
    let (audit, audit_task) = if config.audit.enabled {
        let (log, task) = AuditLog::spawn(config.audit.path.clone());
        (log, Some(task))
    } else {
        tracing::info!("audit log disabled");
        (AuditLog::disabled(), None)
    };

    // Recovery
    let recovery = match CommandOracle::from_argv(&config.recovery.command) {
        Some(oracle) => {
            tracing::info!(command = ?config.recovery.command, "reconstruction oracle configured");
            RecoveryPolicy::new(Arc::new(oracle), config.recovery.timeout())
        }
        None => {
            tracing::info!("no reconstruction oracle, failed uploads will not be recovered");
            RecoveryPolicy::unavailable()
        }
    };

    let ctx = SessionContext::new(store, cipher, config.channel_config())
        .with_recovery(recovery)
        .with_audit(audit);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Serve ────────────────────────────────────────────────────────────────
    let listen = config.listen_addr();
    let server = SessionServer::bind(
        &listen,
        Arc::new(ctx),
        config.network.max_sessions,
        shutdown_tx.subscribe(),
    )
    .await
    .with_context(|| format!("failed to bind {listen}"))?;

    tracing::info!(
        addr = %server.local_addr()?,
        max_sessions = config.network.max_sessions,
        io_timeout_secs = config.network.io_timeout_secs,
        "verityd starting"
    );

    server.run().await.context("session server failed")?;

    // Give in-flight sessions' audit events a moment to land.
    if let Some(task) = audit_task {
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }
    tracing::info!("verityd stopped");
    Ok(())
}
