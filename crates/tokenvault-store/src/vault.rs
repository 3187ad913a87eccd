//! Composition root: provider → file store → cache.

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;
use tokenvault_core::config::KeystoreBackend;
use tokenvault_core::{VaultConfig, VaultError, VaultResult};
use tokenvault_crypto::KdfParams;

use crate::cache::SecretCache;
use crate::file_store::EncryptedFileStore;
use crate::key_file::FileKeyProvider;
use crate::keychain::KeychainKeyProvider;
use crate::names::obfuscate_label;
use crate::provider::MasterKeyProvider;

/// The application's one managed secret, encrypted at rest.
///
/// ```no_run
/// use tokenvault_core::VaultConfig;
/// use tokenvault_store::TokenVault;
///
/// let config = VaultConfig::load("tokenvault.toml".as_ref())?;
/// let mut vault = TokenVault::open(&config)?;
/// vault.store_secret("tokentokentoken")?;
/// let token = vault.retrieve_secret()?;
/// # Ok::<(), tokenvault_core::VaultError>(())
/// ```
pub struct TokenVault {
    cache: SecretCache,
}

impl TokenVault {
    /// Build the configured keystore, file store and cache.
    pub fn open(config: &VaultConfig) -> VaultResult<Self> {
        let provider = provider_from_config(config)?;
        Self::with_provider(
            config.data_dir()?,
            &config.secret.label,
            config.secret.shift,
            provider,
        )
    }

    pub fn with_provider(
        data_dir: impl Into<PathBuf>,
        label: &str,
        shift: u32,
        provider: Arc<dyn MasterKeyProvider>,
    ) -> VaultResult<Self> {
        let name = obfuscate_label(label, shift)?;
        let data_dir = data_dir.into();
        tracing::debug!(
            dir = %data_dir.display(),
            alias = provider.alias(),
            "opening token vault"
        );
        let store = EncryptedFileStore::new(data_dir, provider);
        Ok(Self {
            cache: SecretCache::new(store, name)?,
        })
    }

    pub fn store_secret(&mut self, plaintext: &str) -> VaultResult<()> {
        self.cache.store(plaintext)
    }

    pub fn retrieve_secret(&mut self) -> VaultResult<String> {
        self.cache.retrieve()
    }

    pub fn cache(&self) -> &SecretCache {
        &self.cache
    }
}

/// Build the master key provider selected by `[keystore] backend`.
pub fn provider_from_config(config: &VaultConfig) -> VaultResult<Arc<dyn MasterKeyProvider>> {
    let keystore = &config.keystore;
    match keystore.backend {
        KeystoreBackend::Keychain => Ok(Arc::new(KeychainKeyProvider::new(
            keystore.service.clone(),
            keystore.alias.clone(),
        ))),
        KeystoreBackend::File => {
            let passphrase = std::env::var(&keystore.passphrase_env).map_err(|_| {
                VaultError::KeyProvisioning(format!(
                    "file keystore needs a passphrase in ${}",
                    keystore.passphrase_env
                ))
            })?;
            let params = KdfParams {
                mem_cost_kib: keystore.argon2_mem_cost_kib,
                time_cost: keystore.argon2_time_cost,
                parallelism: keystore.argon2_parallelism,
            };
            Ok(Arc::new(FileKeyProvider::new(
                config.key_file()?,
                keystore.alias.clone(),
                SecretString::from(passphrase),
                params,
            )))
        }
    }
}
