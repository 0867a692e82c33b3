//! Authenticated session context.
//!
//! A [`Session`] is passed explicitly to everything that needs the signed-in
//! principal or the master key; nothing reads them from ambient state. The
//! master key is derived on sign-up / sign-in from the password and the
//! user's stored salt, held behind an `Arc` so concurrent capsule views can
//! share it read-only, and dropped (zeroised) on sign-out.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::keys::{MasterKey, Salt};
use crate::store::{collections, DocumentStore};

/// The identity the authentication provider vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub uid: String,
    pub email: String,
}

impl Principal {
    pub fn new(uid: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
        }
    }
}

/// The persisted user document, keyed by uid.
///
/// `password_salt` is written once at sign-up and never updated: every
/// wrapped key the user owns depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub uid: String,
    pub email: String,
    pub password_salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl UserRecord {
    pub fn salt(&self) -> VaultResult<Salt> {
        Salt::from_base64(&self.password_salt)
    }
}

/// Load a user record.
pub async fn get_user_record(store: &dyn DocumentStore, uid: &str) -> VaultResult<Option<UserRecord>> {
    match store.get(collections::USERS, uid).await? {
        Some(record) => Ok(Some(serde_json::from_value(record)?)),
        None => Ok(None),
    }
}

/// Set or clear the display name. Touches no other field.
pub async fn update_display_name(
    store: &dyn DocumentStore,
    uid: &str,
    name: &str,
    config: &VaultConfig,
) -> VaultResult<()> {
    let name = name.trim();
    let len = name.chars().count();
    if len != 0 && !(config.min_display_name_len..=config.max_display_name_len).contains(&len) {
        return Err(VaultError::Validation(format!(
            "display name must be {}-{} characters",
            config.min_display_name_len, config.max_display_name_len
        )));
    }
    store
        .update(collections::USERS, uid, json!({ "displayName": name }))
        .await
}

/// The current session: an optional principal and, if the password was
/// entered during this session, the derived master key.
#[derive(Clone, Default)]
pub struct Session {
    principal: Option<Principal>,
    master_key: Option<Arc<MasterKey>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("principal", &self.principal)
            .field("has_master_key", &self.master_key.is_some())
            .finish()
    }
}

async fn derive_off_thread(password: &str, salt: Salt, iterations: u32) -> VaultResult<MasterKey> {
    let password = zeroize::Zeroizing::new(password.to_string());
    tokio::task::spawn_blocking(move || MasterKey::derive(&password, &salt, iterations))
        .await
        .map_err(|e| VaultError::Environment(format!("key derivation task: {e}")))?
}

impl Session {
    /// No principal; authentication has resolved to "signed out".
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A session restored by the authentication provider without the
    /// password being re-entered. It has a principal but no master key.
    pub fn restore(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            master_key: None,
        }
    }

    /// Build a session from an already-derived master key.
    pub fn with_master_key(principal: Principal, master_key: MasterKey) -> Self {
        Self {
            principal: Some(principal),
            master_key: Some(Arc::new(master_key)),
        }
    }

    /// Create the user record with a fresh salt and derive the master key.
    pub async fn sign_up(
        store: &dyn DocumentStore,
        principal: Principal,
        password: &str,
        config: &VaultConfig,
    ) -> VaultResult<Self> {
        if password.chars().count() < config.min_password_len {
            return Err(VaultError::Validation(format!(
                "password must be at least {} characters",
                config.min_password_len
            )));
        }
        if get_user_record(store, &principal.uid).await?.is_some() {
            return Err(VaultError::Validation(format!(
                "user {} already exists",
                principal.uid
            )));
        }

        let salt = Salt::generate()?;
        let record = UserRecord {
            uid: principal.uid.clone(),
            email: principal.email.clone(),
            password_salt: salt.to_base64(),
            display_name: None,
        };
        store
            .set(collections::USERS, &principal.uid, serde_json::to_value(&record)?)
            .await?;

        let master = derive_off_thread(password, salt, config.kdf_iterations).await?;
        info!(uid = %principal.uid, "account created");
        Ok(Self::with_master_key(principal, master))
    }

    /// Re-derive the master key from the stored salt.
    ///
    /// The password is not checked here; a wrong password yields a master
    /// key that simply fails to unwrap anything.
    pub async fn sign_in(
        store: &dyn DocumentStore,
        principal: Principal,
        password: &str,
        config: &VaultConfig,
    ) -> VaultResult<Self> {
        let mut session = Self::restore(principal);
        session.rederive_master_key(store, password, config).await?;
        Ok(session)
    }

    /// Derive the master key for a restored session.
    pub async fn rederive_master_key(
        &mut self,
        store: &dyn DocumentStore,
        password: &str,
        config: &VaultConfig,
    ) -> VaultResult<()> {
        let uid = self
            .principal
            .as_ref()
            .map(|p| p.uid.clone())
            .ok_or_else(|| VaultError::Authorization("no signed-in principal".into()))?;
        if password.is_empty() {
            return Err(VaultError::Validation("password must not be empty".into()));
        }

        let record = get_user_record(store, &uid)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("user record {uid}")))?;
        let master = derive_off_thread(password, record.salt()?, config.kdf_iterations).await?;
        self.master_key = Some(Arc::new(master));
        debug!(uid = %uid, "master key derived");
        Ok(())
    }

    /// Forget the principal and the master key.
    pub fn sign_out(&mut self) {
        self.principal = None;
        self.master_key = None;
    }

    /// React to an authentication-provider notification.
    ///
    /// Signing out, or switching to a different principal, drops the master
    /// key; the same principal keeps it.
    pub fn apply_auth_change(&mut self, principal: Option<Principal>) {
        match principal {
            None => self.sign_out(),
            Some(p) if self.principal.as_ref().map(|cur| &cur.uid) == Some(&p.uid) => {
                self.principal = Some(p);
            }
            Some(p) => {
                self.principal = Some(p);
                self.master_key = None;
            }
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    pub fn master_key(&self) -> Option<&MasterKey> {
        self.master_key.as_deref()
    }

    pub(crate) fn master_key_handle(&self) -> Option<Arc<MasterKey>> {
        self.master_key.clone()
    }
}

/// Authentication-provider notifications.
///
/// Holds the current principal (`None` when signed out) and lets views
/// subscribe to changes.
#[derive(Debug)]
pub struct AuthChannel {
    tx: watch::Sender<Option<Principal>>,
}

impl Default for AuthChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthChannel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish a sign-in (`Some`) or sign-out (`None`).
    pub fn publish(&self, principal: Option<Principal>) {
        self.tx.send_replace(principal);
    }

    pub fn current(&self) -> Option<Principal> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Principal>> {
        self.tx.subscribe()
    }
}
