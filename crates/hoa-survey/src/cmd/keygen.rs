use anyhow::Result;
use member_export::ChaChaFieldCipher;

/// Prints a fresh base64 field key.
pub fn run() -> Result<()> {
    println!("{}", ChaChaFieldCipher::generate_key());
    Ok(())
}
