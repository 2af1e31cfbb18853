//! Merkle root over an ordered chunk sequence.
//!
//! Leaves are `sha256(chunk)`. An internal node is the SHA-256 of its
//! children's lowercase hex digests concatenated as text, so the value a
//! peer compares is exactly the value that was hashed. A range of `n`
//! chunks is split at `n / 2`: the left subtree takes the floor half.
//!
//! The tree is walked with an explicit work stack, so arbitrarily long
//! payloads do not grow the call stack.

use std::fmt;

use bytes::Bytes;
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::chunk::{split, Chunk, ChunkError};
use crate::wire::MERKLE_CHUNK_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("invalid input: cannot compute a root over zero chunks")]
    EmptySequence,
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// A root or node digest: 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    /// Accept a digest received from a peer. Whitespace around it is ignored;
    /// the remainder must be 64 lowercase hex characters.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let well_formed = text.len() == 64
            && text.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// String equality against a digest in wire form.
    pub fn matches(&self, other: &str) -> bool {
        self.0 == other.trim()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn combine(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}

enum Task {
    /// Hash the half-open chunk range.
    Visit(usize, usize),
    /// Pop right then left, push their parent.
    Combine,
}

/// Root digest of `chunks`. Fails on an empty sequence.
pub fn root_digest(chunks: &[Chunk]) -> Result<Digest, MerkleError> {
    if chunks.is_empty() {
        return Err(MerkleError::EmptySequence);
    }

    let mut tasks = vec![Task::Visit(0, chunks.len())];
    let mut digests: Vec<String> = Vec::new();

    while let Some(task) = tasks.pop() {
        match task {
            Task::Visit(lo, hi) if hi - lo == 1 => {
                digests.push(hex_sha256(chunks[lo].as_bytes()));
            }
            Task::Visit(lo, hi) => {
                let mid = lo + (hi - lo) / 2;
                // Left is pushed last so it is evaluated first.
                tasks.push(Task::Combine);
                tasks.push(Task::Visit(mid, hi));
                tasks.push(Task::Visit(lo, mid));
            }
            Task::Combine => {
                let right = digests.pop();
                let left = digests.pop();
                if let (Some(left), Some(right)) = (left, right) {
                    digests.push(combine(&left, &right));
                }
            }
        }
    }

    digests.pop().map(Digest).ok_or(MerkleError::EmptySequence)
}

/// Split `payload` at the protocol chunk size and return its root.
pub fn root_digest_of(payload: impl Into<Bytes>) -> Result<Digest, MerkleError> {
    let chunks = split(payload, MERKLE_CHUNK_SIZE)?;
    root_digest(&chunks)
}
