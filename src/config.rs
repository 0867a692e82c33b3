//! Runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Tunables for key derivation, input policy and the unlock view.
///
/// Every field has a default, so a JSON document only needs to name the
/// values it overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// PBKDF2-HMAC-SHA256 iteration count for master-key derivation.
    /// Changing it makes existing wrapped keys unrecoverable.
    pub kdf_iterations: u32,

    /// Minimum account password length, in characters.
    pub min_password_len: usize,

    /// Inclusive capsule title length bounds, in characters.
    pub min_title_len: usize,
    pub max_title_len: usize,

    /// Minimum capsule message length, in characters.
    pub min_message_len: usize,

    /// Inclusive display-name length bounds. An empty name is always allowed.
    pub min_display_name_len: usize,
    pub max_display_name_len: usize,

    /// Interval between countdown ticks on a locked capsule, in milliseconds.
    pub countdown_tick_ms: u64,

    /// Origin used when rendering share links (no trailing slash).
    pub share_base_url: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: 100_000,
            min_password_len: 8,
            min_title_len: 5,
            max_title_len: 100,
            min_message_len: 20,
            min_display_name_len: 2,
            max_display_name_len: 50,
            countdown_tick_ms: 1_000,
            share_base_url: "https://chronovault.app".to_string(),
        }
    }
}

impl VaultConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json_str(json: &str) -> VaultResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the vault unusable or unsafe.
    pub fn validate(&self) -> VaultResult<()> {
        if self.kdf_iterations == 0 {
            return Err(VaultError::Config("kdf_iterations must be non-zero".into()));
        }
        if self.min_title_len > self.max_title_len {
            return Err(VaultError::Config("min_title_len exceeds max_title_len".into()));
        }
        if self.min_display_name_len > self.max_display_name_len {
            return Err(VaultError::Config(
                "min_display_name_len exceeds max_display_name_len".into(),
            ));
        }
        if self.countdown_tick_ms == 0 {
            return Err(VaultError::Config("countdown_tick_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// The countdown tick as a `Duration`.
    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    /// A configuration with cheap key derivation, for tests.
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            kdf_iterations: 1_000,
            ..Self::default()
        }
    }
}
