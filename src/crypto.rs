//! Low-level cryptographic operations.
//!
//! This module is one of exactly two places in the crate that import `ring`
//! directly (the other is `keys`). Everything above it works with key types
//! and Base64 text; everything here works with raw byte buffers.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **Nonce**: 96-bit (12 bytes), generated fresh inside every `encrypt` call
//! - **Key size**: 256 bits (32 bytes)
//! - **Text encoding**: standard Base64 with padding

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// The AEAD algorithm used throughout chronovault.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of every symmetric key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Output of a single encryption: a detached nonce and the ciphertext with
/// its GCM tag appended, both Base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64 of the 12-byte nonce.
    pub nonce: String,
    /// Base64 of ciphertext || tag.
    pub ciphertext: String,
}

/// Fill `buf` from the system CSPRNG.
///
/// `SystemRandom` is the only source of randomness in the crate. Failure is
/// reported as an environment fault; callers never fall back to anything
/// weaker.
pub(crate) fn fill_random(buf: &mut [u8]) -> VaultResult<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| VaultError::Environment("system randomness unavailable".into()))
}

fn key_for(key_bytes: &[u8; KEY_LEN]) -> VaultResult<LessSafeKey> {
    let unbound = UnboundKey::new(ALGORITHM, key_bytes)
        .map_err(|_| VaultError::Format("key material".into()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` under `key_bytes` with a freshly generated nonce.
///
/// Nonce generation lives here and nowhere else: callers cannot supply a
/// nonce, so they cannot reuse one.
pub(crate) fn encrypt(key_bytes: &[u8; KEY_LEN], plaintext: &[u8]) -> VaultResult<EncryptedPayload> {
    let key = key_for(key_bytes)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    fill_random(&mut nonce_bytes)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = Vec::with_capacity(plaintext.len() + ALGORITHM.tag_len());
    in_out.extend_from_slice(plaintext);
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::Environment("aead seal failed".into()))?;

    Ok(EncryptedPayload {
        nonce: encode(&nonce_bytes),
        ciphertext: encode(&in_out),
    })
}

/// Decrypt a Base64 ciphertext with its Base64 nonce.
///
/// Malformed Base64 or a nonce of the wrong length is a `Format` error. Any
/// tag mismatch (wrong key, wrong nonce, tampered bytes, truncated input) is
/// `Authentication` and yields no partial plaintext.
pub(crate) fn decrypt(
    key_bytes: &[u8; KEY_LEN],
    ciphertext: &str,
    nonce: &str,
) -> VaultResult<Vec<u8>> {
    let nonce_bytes: [u8; NONCE_LEN] = decode(nonce, "nonce")?
        .try_into()
        .map_err(|_| VaultError::Format("nonce".into()))?;
    let mut payload = decode(ciphertext, "ciphertext")?;

    let key = key_for(key_bytes)?;
    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut payload,
        )
        .map_err(|_| VaultError::Authentication)?;

    Ok(plaintext.to_vec())
}

/// SHA-256 of `data`. Used to remember rejected inputs without keeping them.
pub(crate) fn fingerprint(data: &[u8]) -> [u8; 32] {
    let hash = digest::digest(&digest::SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_ref());
    out
}

/// Base64-encode raw bytes.
pub(crate) fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Base64-decode `text`; `what` names the field in the error.
pub(crate) fn decode(text: &str, what: &str) -> VaultResult<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|_| VaultError::Format(what.to_string()))
}
