//! Single-slot cache for the one secret this application manages.
//!
//! Once the slot holds a value it is authoritative for the life of the
//! cache and storage is not consulted again. Slot transitions:
//! `Empty → Populated` (successful read-through or any store) and
//! `Populated → Populated`; there is no way back to `Empty`.
//!
//! Mutating calls take `&mut self`. Callers sharing one cache across threads
//! wrap it in [`SharedSecretCache`].

use std::sync::{Arc, Mutex};

use secrecy::{ExposeSecret, SecretString};
use tokenvault_core::{VaultError, VaultResult};

use crate::file_store::EncryptedFileStore;
use crate::names::validate_file_name;

pub type SharedSecretCache = Arc<Mutex<SecretCache>>;

pub struct SecretCache {
    store: EncryptedFileStore,
    name: String,
    slot: Option<SecretString>,
}

impl SecretCache {
    pub fn new(store: EncryptedFileStore, name: impl Into<String>) -> VaultResult<Self> {
        let name = name.into();
        validate_file_name(&name)?;
        Ok(Self {
            store,
            name,
            slot: None,
        })
    }

    /// File name the secret is stored under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store_ref(&self) -> &EncryptedFileStore {
        &self.store
    }

    pub fn is_populated(&self) -> bool {
        self.slot.is_some()
    }

    /// Return the secret, or an empty string if none was ever stored.
    ///
    /// This cannot tell "never stored" from "stored empty"; use
    /// [`try_retrieve`](SecretCache::try_retrieve) when that matters.
    pub fn retrieve(&mut self) -> VaultResult<String> {
        Ok(self.try_retrieve()?.unwrap_or_default())
    }

    /// Return the secret, or `None` if no file exists for it yet.
    ///
    /// A missing file does not populate the slot, so a later call looks at
    /// storage again.
    pub fn try_retrieve(&mut self) -> VaultResult<Option<String>> {
        if let Some(value) = &self.slot {
            tracing::trace!("secret cache hit");
            return Ok(Some(value.expose_secret().to_owned()));
        }

        match self.store.read(&self.name) {
            Ok(bytes) => {
                let value = String::from_utf8(bytes)
                    .map_err(|_| VaultError::Corrupt(self.name.escape_debug().to_string()))?;
                self.slot = Some(SecretString::from(value.clone()));
                tracing::debug!("secret cache populated from storage");
                Ok(Some(value))
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("no stored secret yet");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist `value`, then make it the cached value.
    ///
    /// If the write fails the slot keeps its previous value and the error is
    /// returned.
    pub fn store(&mut self, value: &str) -> VaultResult<()> {
        self.store.write(&self.name, value.as_bytes())?;
        self.slot = Some(SecretString::from(value.to_owned()));
        Ok(())
    }

    pub fn into_shared(self) -> SharedSecretCache {
        Arc::new(Mutex::new(self))
    }
}
