//! Append-only audit log.
//!
//! Sessions hand events to an unbounded channel; a single writer task owns
//! the file and appends one JSON object per line. The writer exits once
//! every [`AuditLog`] handle has been dropped and the queue is drained.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp_ms: u64,
    pub peer: String,
    pub operation: Option<String>,
    pub filename: Option<String>,
    /// Session state entered, or `outcome` for the closing summary.
    pub event: String,
    pub outcome: String,
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(peer: impl Into<String>, event: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            timestamp_ms: now_ms(),
            peer: peer.into(),
            operation: None,
            filename: None,
            event: event.into(),
            outcome: outcome.into(),
            detail: None,
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Clone, Default)]
pub struct AuditLog {
    tx: Option<mpsc::UnboundedSender<AuditEvent>>,
}

impl AuditLog {
    /// A log that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A log whose events are delivered to the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Start the file writer for `path`.
    pub fn spawn(path: PathBuf) -> (Self, JoinHandle<()>) {
        let (log, rx) = Self::channel();
        let handle = tokio::spawn(write_loop(path, rx));
        (log, handle)
    }

    pub fn record(&self, event: AuditEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::warn!("audit writer gone, event dropped");
            }
        }
    }
}

async fn write_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<AuditEvent>) {
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "cannot open audit log, auditing disabled");
            return;
        }
    };
    tracing::info!(path = %path.display(), "audit log open");

    while let Some(event) = rx.recv().await {
        let mut line = match serde_json::to_vec(&event) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize audit event");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = file.write_all(&line).await {
            tracing::warn!(error = %e, "failed to append audit event");
            continue;
        }
        let _ = file.flush().await;
    }
}
