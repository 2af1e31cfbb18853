//! Client side of the transfer protocol.
//!
//! The free functions drive an already-open [`FramedChannel`], so they work
//! over any stream. [`TransferClient`] dials a server over TCP for each
//! operation, since a session serves exactly one.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use verity_core::channel::{ChannelConfig, ChannelError, FramedChannel};
use verity_core::chunk::{decode_text, TextEncoding};
use verity_core::crypto::{self, Cipher, CryptoError};
use verity_core::merkle::{root_digest_of, Digest, MerkleError};
use verity_core::wire::{
    parse_verdict, Operation, ACK_FILENAME, ACK_OPERATION, DOWNLOAD_READY, FILE_EXISTS,
    FILE_MISSING, LIST_EMPTY, LIST_REQUEST, VERDICT_FALSE, VERDICT_TRUE,
};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("cannot connect to {addr}: {source}")]
    ConnectionFailure {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error("file {0:?} not found on server")]
    NotFound(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Server's integrity verdict, after recovery if one was attempted.
    pub verified: bool,
    /// Final status text from the server.
    pub status: String,
    pub digest: Digest,
    pub encoding: TextEncoding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub text: String,
    pub encoding: TextEncoding,
    /// Local root matched the digest the server sent. A mismatch is
    /// reported, never retried.
    pub verified: bool,
    pub digest: Digest,
}

// ── Channel-level operations ──────────────────────────────────────────────────

async fn handshake<S>(channel: &mut FramedChannel<S>, op: Operation) -> Result<(), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.send_message(op.as_str()).await?;
    channel.expect_message(ACK_OPERATION).await?;
    Ok(())
}

async fn announce_file<S>(channel: &mut FramedChannel<S>, filename: &str) -> Result<(), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.send_message(filename).await?;
    channel.expect_message(ACK_FILENAME).await?;
    Ok(())
}

/// Upload `payload` as text under `filename`.
pub async fn upload<S>(
    channel: &mut FramedChannel<S>,
    cipher: &dyn Cipher,
    filename: &str,
    payload: &[u8],
) -> Result<UploadReport, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (text, encoding) = decode_text(payload);
    let text = text.into_owned().into_bytes();
    let digest = root_digest_of(text.clone())?;
    let envelope = crypto::seal(cipher, &text)?;

    tracing::debug!(filename, bytes = text.len(), digest = %digest, "uploading");
    let (verified, status) = send_upload(channel, filename, &envelope, &digest).await?;
    Ok(UploadReport {
        verified,
        status,
        digest,
        encoding,
    })
}

/// Upload a prepared envelope with a declared digest. Returns the verdict
/// and the final status text.
pub async fn send_upload<S>(
    channel: &mut FramedChannel<S>,
    filename: &str,
    envelope: &[u8],
    digest: &Digest,
) -> Result<(bool, String), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    handshake(channel, Operation::Upload).await?;
    announce_file(channel, filename).await?;
    channel.send_blob(envelope).await?;
    channel.send_message(digest.as_str()).await?;

    // The server may run a recovery attempt before it answers.
    let deadline = channel.config().verdict_timeout;
    let verdict = channel
        .recv_token_within(&[VERDICT_TRUE, VERDICT_FALSE], deadline)
        .await?;
    let verified = parse_verdict(verdict)
        .ok_or_else(|| TransferError::Protocol(format!("bad verdict {verdict:?}")))?;
    let status = channel.recv_to_end().await?;
    Ok((verified, status.trim().to_string()))
}

/// Download `filename`. `NotFound` is returned before any blob is exchanged.
pub async fn download<S>(
    channel: &mut FramedChannel<S>,
    cipher: &dyn Cipher,
    filename: &str,
) -> Result<DownloadReport, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    handshake(channel, Operation::Download).await?;
    announce_file(channel, filename).await?;

    if channel.recv_token(&[FILE_EXISTS, FILE_MISSING]).await? == FILE_MISSING {
        return Err(TransferError::NotFound(filename.to_string()));
    }
    channel.send_message(DOWNLOAD_READY).await?;

    let envelope = channel.recv_blob().await?;
    let declared = channel.recv_to_end().await?;

    let plaintext = crypto::open(cipher, &envelope)?;
    let (text, encoding) = decode_text(&plaintext);
    let text = text.into_owned();
    let digest = root_digest_of(text.clone().into_bytes())?;
    let verified = digest.matches(&declared);
    if !verified {
        tracing::warn!(filename, declared = %declared.trim(), computed = %digest, "download failed verification");
    }

    Ok(DownloadReport {
        text,
        encoding,
        verified,
        digest,
    })
}

/// Names stored on the server.
pub async fn list<S>(channel: &mut FramedChannel<S>) -> Result<Vec<String>, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    handshake(channel, Operation::Show).await?;
    channel.send_message(LIST_REQUEST).await?;
    let reply = channel.recv_to_end().await?;
    if reply.trim() == LIST_EMPTY {
        return Ok(Vec::new());
    }
    Ok(reply
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

// ── TCP client ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TransferClient {
    addr: String,
    cipher: Arc<dyn Cipher>,
    config: ChannelConfig,
}

impl TransferClient {
    pub fn new(addr: impl Into<String>, cipher: Arc<dyn Cipher>, config: ChannelConfig) -> Self {
        Self {
            addr: addr.into(),
            cipher,
            config,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn connect(&self) -> Result<FramedChannel<TcpStream>, TransferError> {
        let stream = tokio::time::timeout(self.config.io_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransferError::ConnectionFailure {
                addr: self.addr.clone(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?
            .map_err(|source| TransferError::ConnectionFailure {
                addr: self.addr.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        Ok(FramedChannel::new(stream, self.config.clone()))
    }

    pub async fn upload(&self, filename: &str, payload: &[u8]) -> Result<UploadReport, TransferError> {
        let mut channel = self.connect().await?;
        upload(&mut channel, self.cipher.as_ref(), filename, payload).await
    }

    pub async fn download(&self, filename: &str) -> Result<DownloadReport, TransferError> {
        let mut channel = self.connect().await?;
        download(&mut channel, self.cipher.as_ref(), filename).await
    }

    pub async fn list(&self) -> Result<Vec<String>, TransferError> {
        let mut channel = self.connect().await?;
        list(&mut channel).await
    }
}
