//! Platform keychain backend for the master key.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: GNOME Keyring / Secret Service (D-Bus)
//! - Windows: Credential Manager (DPAPI)
//!
//! The key is stored base64-encoded under `(service, alias)`. The native
//! stores are compiled in with the `native-keychain` feature. Without it
//! `keyring` only has its mock store, whose credentials live and die with a
//! single entry, and provisioning into such a store is refused.

use std::sync::Mutex;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keyring::credential::{CredentialBuilder, CredentialPersistence};
use secrecy::ExposeSecret;
use tokenvault_core::{VaultError, VaultResult};
use tokenvault_crypto::{MasterKey, KEY_SIZE, MASTER_KEY_SCHEME};
use zeroize::{Zeroize, Zeroizing};

use crate::provider::MasterKeyProvider;

pub struct KeychainKeyProvider {
    service: String,
    alias: String,
    builder: Box<CredentialBuilder>,
    // Serializes provisioning and keeps the key after first load
    cached: Mutex<Option<MasterKey>>,
}

impl KeychainKeyProvider {
    /// Provider over the platform credential store compiled into `keyring`.
    pub fn new(service: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::with_builder(service, alias, keyring::default::default_credential_builder())
    }

    /// Provider over an explicit credential store.
    pub fn with_builder(
        service: impl Into<String>,
        alias: impl Into<String>,
        builder: Box<CredentialBuilder>,
    ) -> Self {
        Self {
            service: service.into(),
            alias: alias.into(),
            builder,
            cached: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self) -> VaultResult<keyring::Entry> {
        let credential = self
            .builder
            .build(None, &self.service, &self.alias)
            .map_err(|e| VaultError::KeyProvisioning(format!("keychain entry creation: {e}")))?;
        Ok(keyring::Entry::new_with_credential(credential))
    }

    /// Refuse stores that cannot hand the same key back to the next process.
    fn check_persistence(&self) -> VaultResult<()> {
        match self.builder.persistence() {
            CredentialPersistence::EntryOnly | CredentialPersistence::ProcessOnly => {
                Err(VaultError::KeyProvisioning(format!(
                    "keychain store for '{}' does not persist credentials \
                     (build with the native-keychain feature or use the file keystore)",
                    self.alias
                )))
            }
            CredentialPersistence::UntilReboot => {
                tracing::warn!(
                    alias = %self.alias,
                    "keychain store keeps credentials only until reboot"
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn load_or_provision(&self) -> VaultResult<MasterKey> {
        self.check_persistence()?;
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(mut encoded) => {
                let key = decode_key(&encoded, &self.alias);
                encoded.zeroize();
                let key = key?;
                tracing::debug!(alias = %self.alias, key_id = %key.key_id(), "loaded master key from keychain");
                Ok(key)
            }
            Err(keyring::Error::NoEntry) => {
                let key = MasterKey::generate();
                let encoded = Zeroizing::new(BASE64.encode(key.expose_secret()));
                entry.set_password(&encoded).map_err(|e| {
                    VaultError::KeyProvisioning(format!("keychain store for '{}': {e}", self.alias))
                })?;
                tracing::info!(
                    alias = %self.alias,
                    key_id = %key.key_id(),
                    scheme = MASTER_KEY_SCHEME,
                    "provisioned new master key in keychain"
                );
                Ok(key)
            }
            Err(e) => Err(VaultError::KeyProvisioning(format!(
                "keychain get for '{}': {e}",
                self.alias
            ))),
        }
    }
}

impl MasterKeyProvider for KeychainKeyProvider {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn get_or_create_key(&self) -> VaultResult<MasterKey> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| VaultError::KeyProvisioning("keychain provider lock poisoned".into()))?;
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }
        let key = self.load_or_provision()?;
        *cached = Some(key.clone());
        Ok(key)
    }
}

/// Decode a base64 keychain value into a master key.
fn decode_key(encoded: &str, alias: &str) -> VaultResult<MasterKey> {
    let bytes = Zeroizing::new(BASE64.decode(encoded.trim()).map_err(|_| {
        VaultError::KeyProvisioning(format!("keychain value for '{alias}' is not base64"))
    })?);
    let array: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        VaultError::KeyProvisioning(format!(
            "keychain value for '{alias}' is {} bytes (expected {KEY_SIZE})",
            bytes.len()
        ))
    })?;
    Ok(MasterKey::from_bytes(array))
}

/// Persistent in-memory credential store shared by every entry built from it.
#[cfg(test)]
pub(crate) mod test_store {
    use std::any::Any;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use keyring::credential::{
        Credential, CredentialApi, CredentialBuilder, CredentialBuilderApi, CredentialPersistence,
    };

    type Slots = Arc<Mutex<HashMap<(String, String), Vec<u8>>>>;

    #[derive(Clone, Default)]
    pub(crate) struct SharedKeychain {
        slots: Slots,
    }

    impl SharedKeychain {
        pub(crate) fn builder(&self) -> Box<CredentialBuilder> {
            Box::new(self.clone())
        }

        pub(crate) fn put(&self, service: &str, user: &str, secret: &[u8]) {
            self.slots
                .lock()
                .unwrap()
                .insert((service.to_owned(), user.to_owned()), secret.to_vec());
        }

        pub(crate) fn len(&self) -> usize {
            self.slots.lock().unwrap().len()
        }
    }

    impl CredentialBuilderApi for SharedKeychain {
        fn build(
            &self,
            _target: Option<&str>,
            service: &str,
            user: &str,
        ) -> keyring::Result<Box<Credential>> {
            Ok(Box::new(SharedCredential {
                slots: Arc::clone(&self.slots),
                id: (service.to_owned(), user.to_owned()),
            }))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn persistence(&self) -> CredentialPersistence {
            CredentialPersistence::UntilDelete
        }
    }

    struct SharedCredential {
        slots: Slots,
        id: (String, String),
    }

    impl CredentialApi for SharedCredential {
        fn set_secret(&self, secret: &[u8]) -> keyring::Result<()> {
            self.slots
                .lock()
                .unwrap()
                .insert(self.id.clone(), secret.to_vec());
            Ok(())
        }

        fn get_secret(&self) -> keyring::Result<Vec<u8>> {
            self.slots
                .lock()
                .unwrap()
                .get(&self.id)
                .cloned()
                .ok_or(keyring::Error::NoEntry)
        }

        fn delete_credential(&self) -> keyring::Result<()> {
            self.slots
                .lock()
                .unwrap()
                .remove(&self.id)
                .map(|_| ())
                .ok_or(keyring::Error::NoEntry)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }
}
