//! Wire vocabulary for the transfer protocol.
//!
//! Every exchange is a sequence of short text messages over one TCP stream,
//! with bulk payloads moved by [`crate::channel::FramedChannel`]. The strings
//! below are the exact bytes peers put on the wire; the spellings of the
//! acknowledgments are fixed by existing peers and must not be corrected.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Well-known listening port.
pub const DEFAULT_PORT: u16 = 4455;

/// Per-read ceiling for short protocol messages.
pub const MESSAGE_BUFFER: usize = 102_400;

/// Merkle leaf size in bytes. Both peers hash with this value; it is never
/// negotiated.
pub const MERKLE_CHUNK_SIZE: usize = 1024;

/// Maximum slice written between two acknowledgments.
pub const SLICE_SIZE: usize = 8192;

/// Flow-control acknowledgment sent after the length header and each slice.
pub const ACK_TOKEN: &str = "OK";

// ── Session messages ──────────────────────────────────────────────────────────

pub const ACK_OPERATION: &str = "Recieved Transfer type";
pub const ACK_FILENAME: &str = "filename recieved";
pub const STATUS_RECEIVED: &str = "File data recieved";
pub const STATUS_UPLOAD_FAILED: &str = "Upload failed";

pub const VERDICT_TRUE: &str = "True";
pub const VERDICT_FALSE: &str = "False";

pub const FILE_EXISTS: &str = "Exist";
pub const FILE_MISSING: &str = "NotExist";

/// Client acknowledgment that it is ready for the download blob.
pub const DOWNLOAD_READY: &str = "Downloading";

/// Client request that starts a listing.
pub const LIST_REQUEST: &str = "Sending Filenames";

/// Listing reply when the store is empty.
pub const LIST_EMPTY: &str = "None";

// ── Operation ─────────────────────────────────────────────────────────────────

/// Operation announced by the client as the first message of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Upload,
    Download,
    /// Listing; `Show` on the wire.
    Show,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Upload, Operation::Download, Operation::Show];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Upload => "Upload",
            Operation::Download => "Download",
            Operation::Show => "Show",
        }
    }

    /// Parse a handshake token. Surrounding whitespace is ignored, anything
    /// else must match exactly.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL.into_iter().find(|op| op.as_str() == token)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpret an integrity verdict message.
pub fn parse_verdict(msg: &str) -> Option<bool> {
    match msg.trim() {
        VERDICT_TRUE => Some(true),
        VERDICT_FALSE => Some(false),
        _ => None,
    }
}
