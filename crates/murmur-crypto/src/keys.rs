use anyhow::{Result, anyhow};
use argon2::Argon2;

/// Fixed application salt. Changing it orphans every stored blob.
pub const KEY_SALT: &[u8] = b"msg_enc_salt_v1";

/// Derive the 256-bit message key from the configured secret with Argon2id.
/// Deterministic: the same secret always yields the same key.
pub fn derive_key(secret: &str) -> Result<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(secret.as_bytes(), KEY_SALT, &mut key)
        .map_err(|e| anyhow!("Key derivation failed: {}", e))?;
    Ok(key)
}
