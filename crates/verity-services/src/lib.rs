//! verity-services — the transfer session state machine, the TCP server that
//! hosts it, the matching client, and the stateful collaborators sessions
//! share (file store, audit log, reconstruction oracle).

pub mod audit;
pub mod client;
pub mod recovery;
pub mod server;
pub mod session;
pub mod store;

pub use audit::{AuditEvent, AuditLog};
pub use client::{DownloadReport, TransferClient, TransferError, UploadReport};
pub use recovery::{CommandOracle, FnOracle, FormatHint, ReconstructionOracle, RecoveryPolicy, RecoveryResult};
pub use server::SessionServer;
pub use session::{SessionContext, SessionError, SessionState, TransferOutcome, TransferSession};
pub use store::{FileStore, NameGuard, StoreError};
