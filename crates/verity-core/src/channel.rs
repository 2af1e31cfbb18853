//! FramedChannel — message and blob transport over one byte stream.
//!
//! Short protocol messages are single writes. Blobs use stop-and-wait flow
//! control:
//!
//!   sender                         receiver
//!   ──────                         ────────
//!   "<decimal length>"     ──▶
//!                          ◀──     "OK"
//!   slice 0 (≤ SLICE_SIZE) ──▶
//!                          ◀──     "OK"
//!   ...                            (until `length` bytes arrived)
//!
//! Only one slice is ever unacknowledged. Every read is bounded by
//! `io_timeout`; a zero-byte read means the peer closed the connection.
//!
//! TCP does not preserve message boundaries, so reads that may be followed
//! by more data from the same sender are exact: slices and acks by length,
//! fixed tokens through [`FramedChannel::recv_token`].

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::wire::{ACK_TOKEN, MESSAGE_BUFFER, SLICE_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("no data from peer within {0:?}")]
    Timeout(Duration),
    #[error("invalid blob length header {0:?}")]
    BadLength(String),
    #[error("blob of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("expected {expected:?}, got {got:?}")]
    UnexpectedMessage { expected: String, got: String },
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Upper bound for a single short-message read.
    pub message_buffer: usize,
    /// Blob slice size between acknowledgments.
    pub slice_size: usize,
    /// Deadline for each read.
    pub io_timeout: Duration,
    /// Deadline for a reply the peer may only send after slow work of its
    /// own, such as the upload verdict that follows a recovery attempt.
    pub verdict_timeout: Duration,
    /// Largest blob length a receiver accepts.
    pub max_blob_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            message_buffer: MESSAGE_BUFFER,
            slice_size: SLICE_SIZE,
            io_timeout: Duration::from_secs(30),
            verdict_timeout: Duration::from_secs(30 + 120),
            max_blob_len: 256 * 1024 * 1024,
        }
    }
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, ChannelError>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(r) => r.map_err(read_error),
        Err(_) => Err(ChannelError::Timeout(limit)),
    }
}

fn read_error(e: io::Error) -> ChannelError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ChannelError::ConnectionClosed
    } else {
        ChannelError::Io(e)
    }
}

pub struct FramedChannel<S> {
    stream: S,
    config: ChannelConfig,
}

impl<S> FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, config: ChannelConfig) -> Self {
        Self { stream, config }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    // ── Short messages ────────────────────────────────────────────────────────

    pub async fn send_message(&mut self, msg: &str) -> Result<(), ChannelError> {
        self.send_bytes(msg.as_bytes()).await
    }

    async fn send_bytes(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let limit = self.config.io_timeout;
        bounded(limit, async {
            self.stream.write_all(data).await?;
            self.stream.flush().await
        })
        .await
    }

    /// One bounded read. Use only when the peer sends nothing further until
    /// it hears back from us.
    pub async fn recv_message(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut buf = vec![0u8; self.config.message_buffer];
        let limit = self.config.io_timeout;
        let n = bounded(limit, self.stream.read(&mut buf)).await?;
        if n == 0 {
            return Err(ChannelError::ConnectionClosed);
        }
        buf.truncate(n);
        Ok(buf)
    }

    pub async fn recv_text(&mut self) -> Result<String, ChannelError> {
        let raw = self.recv_message().await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Read exactly `expected.len()` bytes and require them to equal `expected`.
    pub async fn expect_message(&mut self, expected: &str) -> Result<(), ChannelError> {
        let got = self.read_exact_vec(expected.len()).await?;
        if got != expected.as_bytes() {
            return Err(ChannelError::UnexpectedMessage {
                expected: expected.to_string(),
                got: String::from_utf8_lossy(&got).into_owned(),
            });
        }
        Ok(())
    }

    /// Read exactly one of `tokens`, byte by byte, leaving whatever follows
    /// it unread. No token may be a prefix of another.
    pub async fn recv_token(&mut self, tokens: &[&'static str]) -> Result<&'static str, ChannelError> {
        let limit = self.config.io_timeout;
        self.recv_token_within(tokens, limit).await
    }

    /// [`recv_token`](Self::recv_token) with an explicit deadline for the
    /// whole token.
    pub async fn recv_token_within(
        &mut self,
        tokens: &[&'static str],
        limit: Duration,
    ) -> Result<&'static str, ChannelError> {
        match timeout(limit, self.read_token(tokens)).await {
            Ok(r) => r,
            Err(_) => Err(ChannelError::Timeout(limit)),
        }
    }

    async fn read_token(&mut self, tokens: &[&'static str]) -> Result<&'static str, ChannelError> {
        let mut got = Vec::new();
        loop {
            got.push(self.stream.read_u8().await.map_err(read_error)?);

            if let Some(token) = tokens.iter().find(|t| t.as_bytes() == got.as_slice()) {
                return Ok(*token);
            }
            if !tokens.iter().any(|t| t.as_bytes().starts_with(&got)) {
                return Err(ChannelError::UnexpectedMessage {
                    expected: tokens.join(" | "),
                    got: String::from_utf8_lossy(&got).into_owned(),
                });
            }
        }
    }

    /// Read until the peer closes, bounded by `message_buffer`. For the last
    /// message of a session.
    pub async fn recv_to_end(&mut self) -> Result<String, ChannelError> {
        let limit = self.config.io_timeout;
        let max = self.config.message_buffer;
        let mut out = Vec::new();
        let mut buf = vec![0u8; max.min(8192).max(1)];
        loop {
            let n = bounded(limit, self.stream.read(&mut buf)).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
            if out.len() >= max {
                out.truncate(max);
                break;
            }
        }
        if out.is_empty() {
            return Err(ChannelError::ConnectionClosed);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>, ChannelError> {
        let mut buf = vec![0u8; len];
        let limit = self.config.io_timeout;
        bounded(limit, self.stream.read_exact(&mut buf)).await?;
        Ok(buf)
    }

    async fn send_ack(&mut self) -> Result<(), ChannelError> {
        self.send_message(ACK_TOKEN).await
    }

    async fn await_ack(&mut self) -> Result<(), ChannelError> {
        self.expect_message(ACK_TOKEN).await
    }

    // ── Blobs ─────────────────────────────────────────────────────────────────

    pub async fn send_blob(&mut self, blob: &[u8]) -> Result<(), ChannelError> {
        self.send_message(&blob.len().to_string()).await?;
        self.await_ack().await?;

        let slice_size = self.config.slice_size.max(1);
        let mut sent = 0usize;
        for slice in blob.chunks(slice_size) {
            self.send_bytes(slice).await?;
            self.await_ack().await?;
            sent += slice.len();
            tracing::trace!(sent, total = blob.len(), "blob slice acknowledged");
        }

        tracing::debug!(bytes = blob.len(), "blob sent");
        Ok(())
    }

    pub async fn recv_blob(&mut self) -> Result<Vec<u8>, ChannelError> {
        let header = self.recv_text().await?;
        let len: usize = header
            .trim()
            .parse()
            .map_err(|_| ChannelError::BadLength(header.clone()))?;
        if len > self.config.max_blob_len {
            return Err(ChannelError::TooLarge {
                len,
                max: self.config.max_blob_len,
            });
        }
        self.send_ack().await?;

        let slice_size = self.config.slice_size.max(1);
        let limit = self.config.io_timeout;
        // Grows with the data actually received, not with the declared length.
        let mut blob = Vec::with_capacity(len.min(slice_size * 16));
        let mut slice = vec![0u8; slice_size.min(len)];
        while blob.len() < len {
            let want = slice_size.min(len - blob.len());
            bounded(limit, self.stream.read_exact(&mut slice[..want])).await?;
            blob.extend_from_slice(&slice[..want]);
            self.send_ack().await?;
            tracing::trace!(received = blob.len(), total = len, "blob slice received");
        }

        tracing::debug!(bytes = len, "blob received");
        Ok(blob)
    }
}
