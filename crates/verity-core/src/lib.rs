//! verity-core — wire constants, chunking, Merkle hashing, framing, and the
//! payload cipher. The daemon, the client, and the session layer all build
//! on this crate.

pub mod channel;
pub mod chunk;
pub mod config;
pub mod crypto;
pub mod merkle;
pub mod wire;

pub use channel::{ChannelConfig, ChannelError, FramedChannel};
pub use chunk::{decode_text, split, Chunk, ChunkError, TextEncoding};
pub use crypto::{Cipher, ChaChaCipher, CryptoError, SymmetricKey};
pub use merkle::{root_digest, root_digest_of, Digest, MerkleError};
pub use wire::Operation;
