//! tokenvault-store: encrypted at-rest storage for a single application secret
//!
//! Composition (leaves first):
//!   1. [`MasterKeyProvider`]: platform keychain, passphrase-wrapped key file,
//!      or in-memory (tests). Provisions the master key on first use.
//!   2. [`EncryptedFileStore`]: one `AES256_GCM_HKDF_4KB` file per name in an
//!      application-private directory; delete-then-recreate on every write.
//!   3. [`SecretCache`]: single-slot memoization for the one well-known name.
//!
//! [`TokenVault`] wires the three together from a [`VaultConfig`] and exposes
//! the caller surface: `store_secret` / `retrieve_secret`.
//!
//! [`VaultConfig`]: tokenvault_core::VaultConfig

pub mod cache;
pub mod file_store;
pub mod key_file;
pub mod keychain;
pub mod names;
pub mod provider;
pub mod vault;

pub use cache::{SecretCache, SharedSecretCache};
pub use file_store::{EncryptedFileStore, StoreStats};
pub use key_file::FileKeyProvider;
pub use keychain::KeychainKeyProvider;
pub use names::{obfuscate_label, validate_file_name};
pub use provider::{MasterKeyProvider, MemoryKeyProvider};
pub use vault::{provider_from_config, TokenVault};

pub use tokenvault_core::{VaultError, VaultResult};
