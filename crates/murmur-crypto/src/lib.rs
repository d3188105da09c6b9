/// Murmur Crypto Library
///
/// Message bodies are encrypted at rest with AES-256-GCM under a single
/// server-side key derived from a configured secret. Stored blobs use the
/// textual form `enc:<nonce>:<ciphertext>:<tag>`; anything without the
/// `enc:` prefix is legacy plaintext and passes through untouched.
pub mod codec;
pub mod keys;

pub use codec::{ENCRYPTED_PREFIX, MessageCodec, is_encrypted};
