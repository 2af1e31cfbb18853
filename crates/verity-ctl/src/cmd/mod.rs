//! CLI command modules.

pub mod download;
pub mod keygen;
pub mod list;
pub mod upload;
