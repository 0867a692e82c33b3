//! # chronovault
//!
//! Time-locked, end-to-end encrypted capsules.
//!
//! Every capsule body is encrypted under its own random message key. How
//! that key is protected depends on the capsule's visibility:
//!
//! | Visibility          | Key protection                               |
//! |---------------------|----------------------------------------------|
//! | `public`            | exported in plaintext                        |
//! | `private-self`      | wrapped under the creator's master key       |
//! | `private-recipient` | exported in plaintext, gated on recipient id |
//!
//! The master key is derived from the user's password and a per-user salt,
//! and exists only in the memory of an authenticated [`Session`].
//!
//! Reading a capsule goes through an [`UnlockFlow`], which checks the open
//! date and the viewer's authorization before any decryption is attempted.
//!
//! ## Public API
//!
//! Raw AEAD and randomness live in a crate-private module. Callers work with
//! the key types in [`keys`] and the Base64 records in [`envelope`].

pub(crate) mod crypto;

pub mod audit;
pub mod capsule;
pub mod config;
pub mod countdown;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod listing;
pub mod notify;
pub mod session;
pub mod store;
pub mod unlock;

pub use capsule::{create_capsule, seal_capsule, CapsuleDraft, Recipient, ShareLink};
pub use config::VaultConfig;
pub use crypto::EncryptedPayload;
pub use envelope::{CapsuleEnvelope, CapsuleStatus, KeyProtection, Visibility};
pub use error::{VaultError, VaultResult};
pub use keys::{select_key_strategy, unwrap_key, wrap_key, KeyStrategy, MasterKey, MessageKey, Salt};
pub use session::{Principal, Session};
pub use store::{DocumentStore, MemoryStore};
pub use unlock::{UnlockFlow, UnlockState};

/// Generate a fresh random message key.
///
/// Each capsule gets exactly one. Nonces are generated inside every
/// encryption call, so a key may safely encrypt more than once.
pub fn generate_message_key() -> VaultResult<MessageKey> {
    MessageKey::generate()
}
