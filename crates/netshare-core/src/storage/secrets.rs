//! Secret storage for connection credentials.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Storage for credentials that must not land in plaintext JSON.
pub trait SecretStore: Send + Sync + fmt::Debug {
    /// Store `secret` under `key`.
    fn set_secret(&self, key: &str, secret: &str) -> Result<()>;

    /// Retrieve the secret under `key`, `None` if nothing is stored.
    fn secret(&self, key: &str) -> Result<Option<String>>;

    /// Delete the secret under `key`. Deleting a missing secret succeeds.
    fn delete_secret(&self, key: &str) -> Result<()>;
}

/// Process-local secret store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn set_secret(&self, key: &str, secret: &str) -> Result<()> {
        self.secrets
            .write()
            .map_err(|_| Error::SecretStorage("secret lock poisoned".to_string()))?
            .insert(key.to_string(), secret.to_string());
        Ok(())
    }

    fn secret(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .secrets
            .read()
            .map_err(|_| Error::SecretStorage("secret lock poisoned".to_string()))?
            .get(key)
            .cloned())
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        self.secrets
            .write()
            .map_err(|_| Error::SecretStorage("secret lock poisoned".to_string()))?
            .remove(key);
        Ok(())
    }
}

/// Secret store backed by the OS keychain.
#[cfg(feature = "keyring")]
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

#[cfg(feature = "keyring")]
impl KeyringSecretStore {
    /// Keychain service name used by default.
    pub const DEFAULT_SERVICE: &'static str = "netshare";

    /// Create a store writing entries under `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| Error::SecretStorage(format!("keychain not available: {e}")))
    }
}

#[cfg(feature = "keyring")]
impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SERVICE)
    }
}

#[cfg(feature = "keyring")]
impl SecretStore for KeyringSecretStore {
    fn set_secret(&self, key: &str, secret: &str) -> Result<()> {
        self.entry(key)?
            .set_password(secret)
            .map_err(|e| Error::SecretStorage(format!("failed to store in keychain: {e}")))
    }

    fn secret(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::SecretStorage(format!(
                "failed to retrieve from keychain: {e}"
            ))),
        }
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::SecretStorage(format!(
                "failed to delete from keychain: {e}"
            ))),
        }
    }
}
