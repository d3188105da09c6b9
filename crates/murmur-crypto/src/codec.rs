use std::fmt;
use std::sync::OnceLock;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use tracing::warn;

use crate::keys::derive_key;

/// Literal prefix marking an encrypted blob.
pub const ENCRYPTED_PREFIX: &str = "enc:";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Format sniff only: says nothing about whether the blob will decrypt.
pub fn is_encrypted(text: &str) -> bool {
    text.starts_with(ENCRYPTED_PREFIX)
}

/// Transparent at-rest codec for message bodies.
///
/// The key is derived on first use and kept for the codec's lifetime.
/// Neither direction ever fails towards the caller: a failed encrypt stores
/// plaintext, a failed decrypt hands back the stored blob.
pub struct MessageCodec {
    secret: String,
    key: OnceLock<Option<[u8; 32]>>,
}

impl MessageCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            key: OnceLock::new(),
        }
    }

    fn key(&self) -> Option<&[u8; 32]> {
        self.key
            .get_or_init(|| match derive_key(&self.secret) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!("Message key unavailable, bodies will be stored as plaintext: {}", e);
                    None
                }
            })
            .as_ref()
    }

    /// Encrypt to `enc:<nonce>:<ciphertext>:<tag>`, or return the plaintext
    /// unchanged if encryption is impossible.
    pub fn encrypt(&self, plaintext: &str) -> String {
        match self.try_encrypt(plaintext) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Encryption failed, storing plaintext: {}", e);
                plaintext.to_string()
            }
        }
    }

    /// Encrypt unless the content already carries the encrypted prefix.
    pub fn encrypt_if_needed(&self, content: &str) -> String {
        if is_encrypted(content) {
            content.to_string()
        } else {
            self.encrypt(content)
        }
    }

    /// Decrypt a stored blob. Plaintext rows, malformed blobs and blobs that
    /// fail authentication come back unchanged.
    pub fn decrypt(&self, blob: &str) -> String {
        if !is_encrypted(blob) {
            return blob.to_string();
        }
        match self.try_decrypt(blob) {
            Ok(plain) => plain,
            Err(e) => {
                warn!("Decryption failed, returning stored blob: {}", e);
                blob.to_string()
            }
        }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        let key = self.key().ok_or_else(|| anyhow!("no message key"))?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
    }

    fn try_encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the ciphertext
        let mut sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}{}:{}:{}",
            ENCRYPTED_PREFIX,
            B64.encode(nonce_bytes),
            B64.encode(&sealed),
            B64.encode(&tag)
        ))
    }

    fn try_decrypt(&self, blob: &str) -> Result<String> {
        let parts: Vec<&str> = blob.split(':').collect();
        if parts.len() != 4 {
            bail!("expected 4 blob segments, found {}", parts.len());
        }

        let nonce_bytes = B64.decode(parts[1])?;
        let mut sealed = B64.decode(parts[2])?;
        let tag = B64.decode(parts[3])?;
        if nonce_bytes.len() != NONCE_LEN {
            bail!("bad nonce length {}", nonce_bytes.len());
        }
        if tag.len() != TAG_LEN {
            bail!("bad tag length {}", tag.len());
        }
        sealed.extend_from_slice(&tag);

        let cipher = self.cipher()?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), sealed.as_slice())
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        Ok(String::from_utf8(plaintext)?)
    }
}

impl fmt::Debug for MessageCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCodec")
            .field("key_ready", &self.key.get().is_some())
            .finish_non_exhaustive()
    }
}
