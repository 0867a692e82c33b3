//! Error types for chronovault.
//!
//! Each variant is a distinct failure class. Inside the unlock flow,
//! `Authentication` becomes `DecryptionFailed` and any other failure
//! becomes `Error`. `AccessDenied` comes from the gate, never from an error.
//! Messages say *what* failed and never carry key material.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type VaultResult<T> = Result<T, VaultError>;

/// The single error type for all chronovault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Malformed Base64, wrong key length, or an envelope whose key material
    /// does not match its visibility.
    #[error("malformed {0}")]
    Format(String),

    /// AEAD tag verification failed. Wrong key and corrupted ciphertext are
    /// deliberately indistinguishable.
    #[error("authentication failed")]
    Authentication,

    /// The principal is missing or is not allowed to obtain the key.
    #[error("access denied: {0}")]
    Authorization(String),

    /// Entropy source or a collaborator (store, runtime) is unavailable.
    #[error("environment failure: {0}")]
    Environment(String),

    /// Caller input rejected by policy (title length, password length, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The document store rejected or failed an operation.
    #[error("store error: {0}")]
    Store(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A stored record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    /// Returns true for failures caused by the caller's environment rather
    /// than by key material or authorization.
    pub fn is_environmental(&self) -> bool {
        matches!(self, Self::Environment(_) | Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_message_reveals_nothing() {
        assert_eq!(VaultError::Authentication.to_string(), "authentication failed");
    }

    #[test]
    fn environmental_classification() {
        assert!(VaultError::Environment("rng".into()).is_environmental());
        assert!(VaultError::Store("offline".into()).is_environmental());
        assert!(!VaultError::Authentication.is_environmental());
        assert!(!VaultError::Format("key".into()).is_environmental());
    }
}
