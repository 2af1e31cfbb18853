//! Payload chunking and the text decoding chain.
//!
//! A payload is cut into fixed-size [`Chunk`]s that share the payload's
//! buffer. Text payloads are decoded first (see [`decode_text`]) and the
//! UTF-8 bytes of the decoded text are what get chunked, so both peers hash
//! the same bytes regardless of the encoding the file arrived in.

use std::borrow::Cow;

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("invalid input: chunk size must be greater than zero")]
    ZeroChunkSize,
}

/// An immutable slice of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk(Bytes);

impl Chunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Partition `payload` into `ceil(len / chunk_size)` chunks, the last of
/// which may be short. An empty payload yields exactly one empty chunk.
pub fn split(payload: impl Into<Bytes>, chunk_size: usize) -> Result<Vec<Chunk>, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    let payload: Bytes = payload.into();
    if payload.is_empty() {
        return Ok(vec![Chunk(payload)]);
    }

    let mut chunks = Vec::with_capacity(payload.len().div_ceil(chunk_size));
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + chunk_size).min(payload.len());
        chunks.push(Chunk(payload.slice(offset..end)));
        offset = end;
    }
    Ok(chunks)
}

// ── Text decoding ─────────────────────────────────────────────────────────────

/// Which step of the decoding chain produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
    /// Windows-1252 with undefined bytes dropped.
    Lossy,
}

impl TextEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
            TextEncoding::Lossy => "cp1252-lossy",
        }
    }
}

/// Decode bytes as text: UTF-8, then Latin-1, then lossy Windows-1252.
///
/// Latin-1 is only accepted when no byte falls in the C1 control range
/// (0x80..=0x9F); such bytes in real text almost always mean Windows-1252.
/// The last step never fails, so decoding never aborts a transfer.
pub fn decode_text(bytes: &[u8]) -> (Cow<'_, str>, TextEncoding) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (Cow::Borrowed(text), TextEncoding::Utf8);
    }

    if !bytes.iter().any(|b| (0x80..=0x9F).contains(b)) {
        let text: String = bytes.iter().map(|&b| char::from(b)).collect();
        return (Cow::Owned(text), TextEncoding::Latin1);
    }

    tracing::warn!(len = bytes.len(), "payload is neither utf-8 nor latin-1, decoding lossily");
    let text: String = bytes.iter().filter_map(|&b| cp1252_char(b)).collect();
    (Cow::Owned(text), TextEncoding::Lossy)
}

/// Windows-1252 code points for 0x80..=0x9F. `None` marks undefined bytes.
const CP1252_C1: [Option<char>; 32] = [
    Some('\u{20AC}'), None,             Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None,             Some('\u{017D}'), None,
    None,             Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None,             Some('\u{017E}'), Some('\u{0178}'),
];

fn cp1252_char(b: u8) -> Option<char> {
    match b {
        0x80..=0x9F => CP1252_C1[(b - 0x80) as usize],
        _ => Some(char::from(b)),
    }
}
