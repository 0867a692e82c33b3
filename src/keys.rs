//! Key hierarchy: ownership, derivation, wrapping and strategy selection.
//!
//! This module owns four responsibilities:
//! 1. Holding key material in types that are opaque, non-cloneable, and
//!    zeroised on drop (`MessageKey`, `MasterKey`).
//! 2. Deriving a user's master key from password + salt with
//!    PBKDF2-HMAC-SHA256.
//! 3. Wrapping and unwrapping message keys under a master key.
//! 4. Deciding, per visibility, how a message key is protected.
//!
//! This is one of exactly two modules permitted to import `ring` directly
//! (the other is `crypto`).
//!
//! ## Hierarchy
//!
//! ```text
//! password + salt --PBKDF2--> MasterKey --wraps--> MessageKey --encrypts--> message
//! ```

use std::fmt;
use std::num::NonZeroU32;

use ring::pbkdf2;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{self, EncryptedPayload, KEY_LEN};
use crate::envelope::Visibility;
use crate::error::{VaultError, VaultResult};

/// Size of a per-user salt in bytes.
pub const SALT_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Message key
// ---------------------------------------------------------------------------

/// A one-time key for exactly one capsule body.
///
/// - Not `Clone`. A copy can only be made by exporting and re-importing.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKey {
    bytes: [u8; KEY_LEN],
}

impl MessageKey {
    /// Generate a fresh random key. Fails only if the entropy source does.
    pub fn generate() -> VaultResult<Self> {
        let mut key = Self {
            bytes: [0u8; KEY_LEN],
        };
        crypto::fill_random(&mut key.bytes)?;
        Ok(key)
    }

    /// Export the raw key as Base64.
    pub fn export(&self) -> String {
        crypto::encode(&self.bytes)
    }

    /// Import a key previously produced by [`MessageKey::export`].
    ///
    /// Malformed Base64 or anything other than 32 bytes is a `Format` error.
    pub fn import(encoded: &str) -> VaultResult<Self> {
        let raw = Zeroizing::new(crypto::decode(encoded, "message key")?);
        Self::from_slice(&raw)
    }

    fn from_slice(raw: &[u8]) -> VaultResult<Self> {
        let bytes: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|_| VaultError::Format("message key".into()))?;
        Ok(Self { bytes })
    }

    /// Encrypt `plaintext` under this key with a fresh nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> VaultResult<EncryptedPayload> {
        crypto::encrypt(&self.bytes, plaintext)
    }

    /// Decrypt a Base64 ciphertext/nonce pair produced by [`MessageKey::encrypt`].
    pub fn decrypt(&self, ciphertext: &str, nonce: &str) -> VaultResult<Vec<u8>> {
        crypto::decrypt(&self.bytes, ciphertext, nonce)
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessageKey(..)")
    }
}

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// A user's long-term key, derived from password + salt.
///
/// Lives only in session memory: it has no export, no serde, and is zeroised
/// on drop. It is used for nothing but wrapping message keys.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Derive a master key with PBKDF2-HMAC-SHA256.
    ///
    /// Deterministic: the same password, salt and iteration count always
    /// produce the same key. A zero iteration count is a `Config` error;
    /// password policy is enforced by the session layer.
    pub fn derive(password: &str, salt: &Salt, iterations: u32) -> VaultResult<Self> {
        let iterations = NonZeroU32::new(iterations)
            .ok_or_else(|| VaultError::Config("kdf iterations must be non-zero".into()))?;

        let mut key = Self {
            bytes: [0u8; KEY_LEN],
        };
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            &salt.bytes,
            password.as_bytes(),
            &mut key.bytes,
        );
        Ok(key)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

// ---------------------------------------------------------------------------
// Salt
// ---------------------------------------------------------------------------

/// A per-user KDF salt. Generated once at account creation, never changed.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt {
    bytes: [u8; SALT_LEN],
}

impl Salt {
    /// Generate a fresh random salt.
    pub fn generate() -> VaultResult<Self> {
        let mut bytes = [0u8; SALT_LEN];
        crypto::fill_random(&mut bytes)?;
        Ok(Self { bytes })
    }

    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self { bytes }
    }

    /// Parse the Base64 form stored in a user record.
    pub fn from_base64(encoded: &str) -> VaultResult<Self> {
        let bytes: [u8; SALT_LEN] = crypto::decode(encoded, "salt")?
            .try_into()
            .map_err(|_| VaultError::Format("salt".into()))?;
        Ok(Self { bytes })
    }

    /// The Base64 form stored in a user record.
    pub fn to_base64(&self) -> String {
        crypto::encode(&self.bytes)
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", self.to_base64())
    }
}

// ---------------------------------------------------------------------------
// Wrapping
// ---------------------------------------------------------------------------

/// A message key encrypted under a master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Base64 of the encrypted key bytes plus tag.
    pub wrapped: String,
    /// Base64 of the nonce used for this wrap.
    pub nonce: String,
}

/// Wrap `key` under `master`. Every call uses a fresh nonce.
pub fn wrap_key(key: &MessageKey, master: &MasterKey) -> VaultResult<WrappedKey> {
    let EncryptedPayload { nonce, ciphertext } = crypto::encrypt(&master.bytes, &key.bytes)?;
    Ok(WrappedKey {
        wrapped: ciphertext,
        nonce,
    })
}

/// Recover a message key wrapped by [`wrap_key`].
///
/// A master key derived from the wrong password, or corrupted wrap data,
/// fails with `Authentication`.
pub fn unwrap_key(wrapped: &str, nonce: &str, master: &MasterKey) -> VaultResult<MessageKey> {
    let raw = Zeroizing::new(crypto::decrypt(&master.bytes, wrapped, nonce)?);
    MessageKey::from_slice(&raw)
}

// ---------------------------------------------------------------------------
// Strategy selection
// ---------------------------------------------------------------------------

/// How a capsule's message key is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStrategy {
    /// Key stored in plaintext; anyone holding the envelope can open it.
    ExportPlaintext,
    /// Key wrapped under the creator's master key.
    WrapWithMaster,
    /// Key stored in plaintext; access is gated on the recipient's identity.
    ExportPlaintextWithAcl,
}

impl KeyStrategy {
    /// True when unlocking requires the session's master key.
    pub fn requires_master_key(&self) -> bool {
        matches!(self, Self::WrapWithMaster)
    }

    /// True when unlocking requires the principal to be the recipient.
    pub fn requires_recipient(&self) -> bool {
        matches!(self, Self::ExportPlaintextWithAcl)
    }

    /// True when the envelope carries the key in exported form.
    pub fn stores_exported_key(&self) -> bool {
        !self.requires_master_key()
    }
}

/// Map a visibility onto its key-protection strategy.
///
/// This is the only place the decision is made; creation and unlock both
/// call it rather than branching on visibility themselves.
pub fn select_key_strategy(visibility: Visibility) -> KeyStrategy {
    match visibility {
        Visibility::Public => KeyStrategy::ExportPlaintext,
        Visibility::PrivateSelf => KeyStrategy::WrapWithMaster,
        Visibility::PrivateRecipient => KeyStrategy::ExportPlaintextWithAcl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_ITERATIONS: u32 = 1_000;

    #[test]
    fn derivation_is_deterministic() {
        let salt = Salt::from_bytes([3u8; SALT_LEN]);
        let a = MasterKey::derive("correct horse", &salt, TEST_ITERATIONS).unwrap();
        let b = MasterKey::derive("correct horse", &salt, TEST_ITERATIONS).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn derivation_depends_on_salt_and_password() {
        let salt_a = Salt::from_bytes([3u8; SALT_LEN]);
        let salt_b = Salt::from_bytes([4u8; SALT_LEN]);
        let base = MasterKey::derive("pw-one-two", &salt_a, TEST_ITERATIONS).unwrap();
        let other_salt = MasterKey::derive("pw-one-two", &salt_b, TEST_ITERATIONS).unwrap();
        let other_pw = MasterKey::derive("pw-one-three", &salt_a, TEST_ITERATIONS).unwrap();
        assert_ne!(base.bytes, other_salt.bytes);
        assert_ne!(base.bytes, other_pw.bytes);
    }

    #[test]
    fn keys_are_filled_in_place_and_wipeable() {
        let a = MessageKey::generate().unwrap();
        let b = MessageKey::generate().unwrap();
        assert_ne!(a.bytes, [0u8; KEY_LEN]);
        assert_ne!(a.bytes, b.bytes);

        let mut master = MasterKey::derive("pw-one-two", &Salt::from_bytes([3u8; SALT_LEN]), TEST_ITERATIONS).unwrap();
        assert_ne!(master.bytes, [0u8; KEY_LEN]);
        master.zeroize();
        assert_eq!(master.bytes, [0u8; KEY_LEN]);
    }

    #[test]
    fn zero_iterations_rejected() {
        let salt = Salt::from_bytes([0u8; SALT_LEN]);
        let err = MasterKey::derive("password", &salt, 0).unwrap_err();
        assert!(matches!(err, VaultError::Config(_)));
    }

    #[test]
    fn export_import_preserves_bytes() {
        let key = MessageKey::generate().unwrap();
        let imported = MessageKey::import(&key.export()).unwrap();
        assert_eq!(key.bytes, imported.bytes);
    }

    #[test]
    fn wrong_length_import_is_format_error() {
        let err = MessageKey::import(&crypto::encode(&[0u8; 16])).unwrap_err();
        assert!(matches!(err, VaultError::Format(_)));
    }

    #[test]
    fn unwrap_recovers_same_bytes() {
        let master = MasterKey::derive("pw", &Salt::from_bytes([9u8; SALT_LEN]), TEST_ITERATIONS).unwrap();
        let key = MessageKey::generate().unwrap();
        let wrapped = wrap_key(&key, &master).unwrap();
        let unwrapped = unwrap_key(&wrapped.wrapped, &wrapped.nonce, &master).unwrap();
        assert_eq!(key.bytes, unwrapped.bytes);
    }

    #[test]
    fn salt_base64_roundtrip() {
        let salt = Salt::generate().unwrap();
        assert_eq!(Salt::from_base64(&salt.to_base64()).unwrap(), salt);
        assert!(matches!(
            Salt::from_base64(&crypto::encode(&[1u8; 8])),
            Err(VaultError::Format(_))
        ));
    }

    #[test]
    fn strategy_mapping() {
        assert_eq!(select_key_strategy(Visibility::Public), KeyStrategy::ExportPlaintext);
        assert_eq!(select_key_strategy(Visibility::PrivateSelf), KeyStrategy::WrapWithMaster);
        assert_eq!(
            select_key_strategy(Visibility::PrivateRecipient),
            KeyStrategy::ExportPlaintextWithAcl
        );
        assert!(KeyStrategy::WrapWithMaster.requires_master_key());
        assert!(KeyStrategy::ExportPlaintextWithAcl.requires_recipient());
        assert!(KeyStrategy::ExportPlaintext.stores_exported_key());
    }

    #[test]
    fn debug_redacts_key_material() {
        let key = MessageKey::generate().unwrap();
        assert_eq!(format!("{key:?}"), "MessageKey(..)");
    }
}
