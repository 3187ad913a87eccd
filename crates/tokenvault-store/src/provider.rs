//! Master key capability and the in-memory test provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokenvault_core::{VaultError, VaultResult};
use tokenvault_crypto::MasterKey;

/// Source of the single master key protecting every file in scope.
///
/// Implementations must be idempotent and safe to call concurrently: every
/// call for the life of an installation yields the same logical key, and the
/// key is provisioned exactly once, on first use.
pub trait MasterKeyProvider: Send + Sync {
    /// Identifier of the key inside its secure store.
    fn alias(&self) -> &str;

    /// Return the master key, creating it if the store holds none.
    ///
    /// Fails with [`VaultError::KeyProvisioning`] when the store is
    /// unavailable or its key material is unusable.
    fn get_or_create_key(&self) -> VaultResult<MasterKey>;
}

/// Process-local provider for tests and embedders without a secure store.
pub struct MemoryKeyProvider {
    alias: String,
    key: Mutex<Option<MasterKey>>,
    available: bool,
    calls: AtomicUsize,
    provisioned: AtomicUsize,
}

impl MemoryKeyProvider {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            key: Mutex::new(None),
            available: true,
            calls: AtomicUsize::new(0),
            provisioned: AtomicUsize::new(0),
        }
    }

    /// Provider pre-seeded with a known key.
    pub fn with_key(alias: impl Into<String>, key: MasterKey) -> Self {
        let provider = Self::new(alias);
        *provider.key.lock().unwrap_or_else(|e| e.into_inner()) = Some(key);
        provider
    }

    /// Provider whose store is unreachable; every call fails.
    pub fn unavailable(alias: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::new(alias)
        }
    }

    /// Number of `get_or_create_key` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of keys generated (0 or 1).
    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }
}

impl MasterKeyProvider for MemoryKeyProvider {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn get_or_create_key(&self) -> VaultResult<MasterKey> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(VaultError::KeyProvisioning(format!(
                "in-memory key store '{}' is unavailable",
                self.alias
            )));
        }

        let mut slot = self
            .key
            .lock()
            .map_err(|_| VaultError::KeyProvisioning("key store lock poisoned".into()))?;
        let key = slot.get_or_insert_with(|| {
            self.provisioned.fetch_add(1, Ordering::SeqCst);
            MasterKey::generate()
        });
        Ok(key.clone())
    }
}
