//! TransferSession — server side of one connection.
//!
//!   Idle → Handshaking → {Uploading | Downloading | Listing}
//!        → Verifying → {Complete | RecoveryAttempt → Recovered | RecoveryFailed}
//!        → Closed
//!
//! A session serves exactly one operation and then closes the stream. Every
//! state change is logged and recorded in the audit log, and a summary
//! [`TransferOutcome`] is recorded when the session closes.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use verity_core::channel::{ChannelConfig, ChannelError, FramedChannel};
use verity_core::chunk::{decode_text, TextEncoding};
use verity_core::crypto::{self, Cipher, CryptoError};
use verity_core::merkle::{root_digest_of, MerkleError};
use verity_core::wire::{
    Operation, ACK_FILENAME, ACK_OPERATION, DOWNLOAD_READY, FILE_EXISTS, FILE_MISSING,
    LIST_EMPTY, LIST_REQUEST, STATUS_RECEIVED, STATUS_UPLOAD_FAILED, VERDICT_FALSE,
    VERDICT_TRUE,
};

use crate::audit::{AuditEvent, AuditLog};
use crate::recovery::{FormatHint, RecoveryPolicy, RecoveryResult};
use crate::store::{validate_name, FileStore, StoreError};

// ── States ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Handshaking,
    Uploading,
    Downloading,
    Listing,
    Verifying,
    Complete,
    RecoveryAttempt,
    Recovered,
    RecoveryFailed,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Handshaking => "Handshaking",
            SessionState::Uploading => "Uploading",
            SessionState::Downloading => "Downloading",
            SessionState::Listing => "Listing",
            SessionState::Verifying => "Verifying",
            SessionState::Complete => "Complete",
            SessionState::RecoveryAttempt => "RecoveryAttempt",
            SessionState::Recovered => "Recovered",
            SessionState::RecoveryFailed => "RecoveryFailed",
            SessionState::Closed => "Closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub operation: Option<Operation>,
    pub filename: Option<String>,
    pub success: bool,
    /// The first verification matched.
    pub integrity_verified: bool,
    pub recovery_attempted: bool,
    /// `None` when no recovery was attempted.
    pub recovery_succeeded: Option<bool>,
    /// The last comparison performed matched.
    pub final_digest_match: bool,
    /// Last state before `Closed`.
    pub final_state: SessionState,
    /// Every state entered, in order.
    pub trace: Vec<SessionState>,
}

impl Default for TransferOutcome {
    fn default() -> Self {
        Self {
            operation: None,
            filename: None,
            success: false,
            integrity_verified: false,
            recovery_attempted: false,
            recovery_succeeded: None,
            final_digest_match: false,
            final_state: SessionState::Idle,
            trace: vec![SessionState::Idle],
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown operation {0:?}")]
    UnknownOperation(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

// ── Shared context ────────────────────────────────────────────────────────────

/// Everything a session needs besides its stream. Shared by all sessions.
pub struct SessionContext {
    pub store: FileStore,
    pub cipher: Arc<dyn Cipher>,
    pub recovery: RecoveryPolicy,
    pub audit: AuditLog,
    pub channel: ChannelConfig,
}

impl SessionContext {
    pub fn new(store: FileStore, cipher: Arc<dyn Cipher>, channel: ChannelConfig) -> Self {
        Self {
            store,
            cipher,
            recovery: RecoveryPolicy::unavailable(),
            audit: AuditLog::disabled(),
            channel,
        }
    }

    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct TransferSession<S> {
    channel: FramedChannel<S>,
    ctx: Arc<SessionContext>,
    peer: String,
    state: SessionState,
    outcome: TransferOutcome,
}

impl<S> TransferSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: impl Into<String>, ctx: Arc<SessionContext>) -> Self {
        Self {
            channel: FramedChannel::new(stream, ctx.channel.clone()),
            ctx,
            peer: peer.into(),
            state: SessionState::Idle,
            outcome: TransferOutcome::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve one operation, then close the stream.
    ///
    /// Fatal protocol and connection errors are returned after the session
    /// has been closed and audited; everything else ends in `Ok`, successful
    /// or not.
    pub async fn run(mut self) -> Result<TransferOutcome, SessionError> {
        let result = self.serve().await;

        if let Err(e) = &result {
            tracing::warn!(peer = %self.peer, state = %self.state, error = %e, "session aborted");
        }
        self.outcome.final_state = self.state;
        self.enter(SessionState::Closed);
        self.audit_outcome(result.as_ref().err());

        let mut stream = self.channel.into_inner();
        let _ = stream.shutdown().await;

        result.map(|()| self.outcome)
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        self.enter(SessionState::Handshaking);
        let token = self.channel.recv_text().await?;
        let op = Operation::parse(&token)
            .ok_or_else(|| SessionError::UnknownOperation(token.trim().to_string()))?;
        self.outcome.operation = Some(op);
        tracing::info!(peer = %self.peer, operation = %op, "session started");
        self.channel.send_message(ACK_OPERATION).await?;

        match op {
            Operation::Upload => self.upload().await,
            Operation::Download => self.download().await,
            Operation::Show => self.list().await,
        }
    }

    async fn recv_filename(&mut self) -> Result<String, SessionError> {
        let raw = self.channel.recv_text().await?;
        let name = validate_name(&raw)?.to_string();
        self.outcome.filename = Some(name.clone());
        self.channel.send_message(ACK_FILENAME).await?;
        Ok(name)
    }

    // ── Upload ────────────────────────────────────────────────────────────────

    async fn upload(&mut self) -> Result<(), SessionError> {
        self.enter(SessionState::Uploading);
        let name = self.recv_filename().await?;
        let envelope = self.channel.recv_blob().await?;
        let declared = self.channel.recv_text().await?;
        let declared = declared.trim().to_string();

        let plaintext = match crypto::open(self.ctx.cipher.as_ref(), &envelope) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(peer = %self.peer, filename = %name, error = %e, "upload rejected");
                self.channel.send_message(VERDICT_FALSE).await?;
                self.channel.send_message(STATUS_UPLOAD_FAILED).await?;
                return Ok(());
            }
        };

        let (text, encoding) = decode_text(&plaintext);
        if encoding != TextEncoding::Utf8 {
            tracing::info!(filename = %name, encoding = encoding.as_str(), "payload decoded with fallback encoding");
        }

        let _guard = self.ctx.store.lock(&name).await;
        self.ctx.store.write(&name, text.as_bytes()).await?;

        self.enter(SessionState::Verifying);
        let stored = self.ctx.store.read(&name).await?;
        let local = root_digest_of(stored.clone())?;

        if local.matches(&declared) {
            tracing::info!(peer = %self.peer, filename = %name, digest = %local, "upload verified");
            self.outcome.integrity_verified = true;
            self.outcome.final_digest_match = true;
            self.outcome.success = true;
            self.channel.send_message(VERDICT_TRUE).await?;
            self.enter(SessionState::Complete);
        } else {
            tracing::warn!(
                peer = %self.peer,
                filename = %name,
                declared = %declared,
                computed = %local,
                "integrity mismatch"
            );
            let recovered = self.recover(&name, &stored, &declared).await?;
            let verdict = if recovered { VERDICT_TRUE } else { VERDICT_FALSE };
            self.channel.send_message(verdict).await?;
        }

        self.channel.send_message(STATUS_RECEIVED).await?;
        Ok(())
    }

    /// One reconstruction attempt. Persists the candidate only if it hashes
    /// to the declared digest.
    async fn recover(&mut self, name: &str, stored: &[u8], declared: &str) -> Result<bool, SessionError> {
        self.enter(SessionState::RecoveryAttempt);
        self.outcome.recovery_attempted = true;

        let hint = FormatHint::from_filename(name);
        let (corrupted, _) = decode_text(stored);

        let result = self.ctx.recovery.attempt(&corrupted, hint).await;
        let candidate = match result {
            RecoveryResult::Reconstructed(text) => text,
            other => {
                tracing::warn!(filename = %name, hint = hint.as_str(), reason = other.describe(), "recovery failed");
                self.outcome.recovery_succeeded = Some(false);
                self.enter(SessionState::RecoveryFailed);
                return Ok(false);
            }
        };

        let recomputed = root_digest_of(candidate.clone().into_bytes())?;
        if !recomputed.matches(declared) {
            tracing::warn!(filename = %name, computed = %recomputed, "reconstruction does not verify");
            self.outcome.recovery_succeeded = Some(false);
            self.enter(SessionState::RecoveryFailed);
            return Ok(false);
        }

        self.ctx.store.write(name, candidate.as_bytes()).await?;
        tracing::info!(filename = %name, digest = %recomputed, "upload recovered");
        self.outcome.recovery_succeeded = Some(true);
        self.outcome.final_digest_match = true;
        self.outcome.success = true;
        self.enter(SessionState::Recovered);
        Ok(true)
    }

    // ── Download ──────────────────────────────────────────────────────────────

    async fn download(&mut self) -> Result<(), SessionError> {
        self.enter(SessionState::Downloading);
        let name = self.recv_filename().await?;

        if !self.ctx.store.exists(&name).await? {
            tracing::info!(peer = %self.peer, filename = %name, "download of missing file");
            self.channel.send_message(FILE_MISSING).await?;
            return Ok(());
        }
        let _guard = self.ctx.store.lock(&name).await;
        self.channel.send_message(FILE_EXISTS).await?;
        self.channel.expect_message(DOWNLOAD_READY).await?;

        let raw = self.ctx.store.read(&name).await?;
        let (text, _) = decode_text(&raw);
        let payload = text.into_owned().into_bytes();
        let envelope = crypto::seal(self.ctx.cipher.as_ref(), &payload)?;
        let digest = root_digest_of(payload)?;

        self.channel.send_blob(&envelope).await?;
        self.channel.send_message(digest.as_str()).await?;

        tracing::info!(peer = %self.peer, filename = %name, digest = %digest, "download sent");
        self.outcome.success = true;
        self.enter(SessionState::Complete);
        Ok(())
    }

    // ── Listing ───────────────────────────────────────────────────────────────

    async fn list(&mut self) -> Result<(), SessionError> {
        self.enter(SessionState::Listing);
        self.channel.expect_message(LIST_REQUEST).await?;

        let names = self.ctx.store.list().await?;
        let reply = if names.is_empty() {
            LIST_EMPTY.to_string()
        } else {
            names.join("\n")
        };
        self.channel.send_message(&reply).await?;

        tracing::debug!(peer = %self.peer, count = names.len(), "listing sent");
        self.outcome.success = true;
        self.enter(SessionState::Complete);
        Ok(())
    }

    // ── Bookkeeping ───────────────────────────────────────────────────────────

    fn enter(&mut self, next: SessionState) {
        tracing::debug!(peer = %self.peer, from = %self.state, to = %next, "session transition");
        self.state = next;
        self.outcome.trace.push(next);

        let mut event = AuditEvent::new(self.peer.clone(), next.as_str(), "ok");
        event.operation = self.outcome.operation.map(|op| op.as_str().to_string());
        event.filename = self.outcome.filename.clone();
        self.ctx.audit.record(event);
    }

    fn audit_outcome(&self, error: Option<&SessionError>) {
        let o = &self.outcome;
        let mut event = AuditEvent::new(
            self.peer.clone(),
            "outcome",
            if o.success { "success" } else { "failure" },
        );
        event.operation = o.operation.map(|op| op.as_str().to_string());
        event.filename = o.filename.clone();
        event.detail = Some(match error {
            Some(e) => e.to_string(),
            None => format!(
                "final_state={} integrity_verified={} recovery_attempted={} final_digest_match={}",
                o.final_state, o.integrity_verified, o.recovery_attempted, o.final_digest_match
            ),
        });
        self.ctx.audit.record(event);
    }
}
