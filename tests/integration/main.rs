//! Verity integration test harness.
//!
//! Every test starts its own in-process server on 127.0.0.1 with an
//! OS-assigned port and a private storage directory under the system temp
//! dir, then talks to it over real TCP:
//!
//!   cargo test --test integration
//!
//! Tests never share a server, a port, or a storage root.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use verity_core::channel::{ChannelConfig, FramedChannel};
use verity_core::crypto::{ChaChaCipher, Cipher, SymmetricKey};
use verity_services::{
    AuditEvent, AuditLog, FileStore, RecoveryPolicy, SessionContext, SessionServer, TransferClient,
};

mod protocol;
mod recovery;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct TestServer {
    pub addr: SocketAddr,
    pub client: TransferClient,
    pub cipher: Arc<dyn Cipher>,
    pub store: FileStore,
    dir: PathBuf,
    audit_path: PathBuf,
    audit_task: JoinHandle<()>,
    shutdown: broadcast::Sender<()>,
    server_task: JoinHandle<std::io::Result<()>>,
}

/// Channel settings with a short deadline so a protocol bug fails the test
/// instead of hanging it.
pub fn test_channel_config() -> ChannelConfig {
    ChannelConfig {
        io_timeout: Duration::from_secs(5),
        ..ChannelConfig::default()
    }
}

pub async fn start_server(tag: &str, recovery: RecoveryPolicy) -> Result<TestServer> {
    let dir = std::env::temp_dir().join(format!("verity-it-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let store = FileStore::open(dir.join("received")).context("failed to open store")?;

    let audit_path = dir.join("audit.jsonl");
    let (audit, audit_task) = AuditLog::spawn(audit_path.clone());

    let cipher: Arc<dyn Cipher> = Arc::new(ChaChaCipher::new(&SymmetricKey::generate()));
    let ctx = SessionContext::new(store.clone(), cipher.clone(), test_channel_config())
        .with_recovery(recovery)
        .with_audit(audit);

    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let server = SessionServer::bind("127.0.0.1:0", Arc::new(ctx), 4, shutdown_rx)
        .await
        .context("failed to bind test server")?;
    let addr = server.local_addr()?;
    let server_task = tokio::spawn(server.run());

    let client = TransferClient::new(addr.to_string(), cipher.clone(), test_channel_config());

    Ok(TestServer {
        addr,
        client,
        cipher,
        store,
        dir,
        audit_path,
        audit_task,
        shutdown,
        server_task,
    })
}

impl TestServer {
    /// A raw framed connection for tests that speak the wire protocol by hand.
    pub async fn raw(&self) -> Result<FramedChannel<TcpStream>> {
        let stream = TcpStream::connect(self.addr)
            .await
            .with_context(|| format!("failed to connect to {}", self.addr))?;
        Ok(FramedChannel::new(stream, test_channel_config()))
    }

    /// Stop the server and return every audit event it wrote.
    pub async fn stop(self) -> Result<Vec<AuditEvent>> {
        let _ = self.shutdown.send(());
        self.server_task.await.context("server task panicked")??;
        drop(self.client);

        tokio::time::timeout(Duration::from_secs(5), self.audit_task)
            .await
            .context("audit writer did not finish")?
            .context("audit writer panicked")?;

        let text = std::fs::read_to_string(&self.audit_path).unwrap_or_default();
        let events = text
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<Vec<AuditEvent>, _>>()
            .context("audit log is not valid JSON lines")?;

        let _ = std::fs::remove_dir_all(&self.dir);
        Ok(events)
    }
}

/// Events recorded for one filename, as `event` names.
pub fn events_for<'a>(events: &'a [AuditEvent], filename: &str) -> Vec<&'a str> {
    events
        .iter()
        .filter(|e| e.filename.as_deref() == Some(filename))
        .map(|e| e.event.as_str())
        .collect()
}
