//! Key generation.

use anyhow::Result;

use verity_core::crypto::SymmetricKey;

pub fn cmd_keygen() -> Result<()> {
    println!("{}", SymmetricKey::generate().to_base64());
    Ok(())
}
