//! Software-protected master key: a passphrase-wrapped key file.
//!
//! Fallback for hosts without a platform keychain. File format:
//! ```text
//! [4 bytes: magic "TVK1"][16 bytes: Argon2id salt][72 bytes: wrapped master key]
//! ```
//! The wrapping key is Argon2id(passphrase, salt); the master key is sealed
//! with XChaCha20-Poly1305 under it. The file is written with mode 0600 and
//! is never replaced once it exists.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::RngCore;
use secrecy::SecretString;
use tokenvault_core::{VaultError, VaultResult};
use tokenvault_crypto::kdf::KDF_SALT_SIZE;
use tokenvault_crypto::{
    derive_wrapping_key, unwrap_master_key, wrap_master_key, KdfParams, MasterKey,
    MASTER_KEY_SCHEME,
};

use crate::provider::MasterKeyProvider;

const KEY_FILE_MAGIC: &[u8; 4] = b"TVK1";

pub struct FileKeyProvider {
    path: PathBuf,
    alias: String,
    passphrase: SecretString,
    params: KdfParams,
    cached: Mutex<Option<MasterKey>>,
}

impl FileKeyProvider {
    pub fn new(
        path: impl Into<PathBuf>,
        alias: impl Into<String>,
        passphrase: SecretString,
        params: KdfParams,
    ) -> Self {
        Self {
            path: path.into(),
            alias: alias.into(),
            passphrase,
            params,
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self, content: &[u8]) -> VaultResult<MasterKey> {
        let header_len = KEY_FILE_MAGIC.len() + KDF_SALT_SIZE;
        if content.len() < header_len || &content[..KEY_FILE_MAGIC.len()] != KEY_FILE_MAGIC {
            return Err(VaultError::KeyProvisioning(format!(
                "key file {} is not a tokenvault key file",
                self.path.display()
            )));
        }

        let mut salt = [0u8; KDF_SALT_SIZE];
        salt.copy_from_slice(&content[KEY_FILE_MAGIC.len()..header_len]);

        let kek = derive_wrapping_key(&self.passphrase, &salt, &self.params)
            .map_err(|e| VaultError::KeyProvisioning(e.to_string()))?;
        unwrap_master_key(&kek, &content[header_len..]).map_err(|e| {
            VaultError::KeyProvisioning(format!(
                "cannot unlock key file {}: {e}",
                self.path.display()
            ))
        })
    }

    fn provision(&self) -> VaultResult<MasterKey> {
        let mut salt = [0u8; KDF_SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        let key = MasterKey::generate();
        let kek = derive_wrapping_key(&self.passphrase, &salt, &self.params)
            .map_err(|e| VaultError::KeyProvisioning(e.to_string()))?;
        let wrapped =
            wrap_master_key(&kek, &key).map_err(|e| VaultError::KeyProvisioning(e.to_string()))?;

        let mut content = Vec::with_capacity(KEY_FILE_MAGIC.len() + KDF_SALT_SIZE + wrapped.len());
        content.extend_from_slice(KEY_FILE_MAGIC);
        content.extend_from_slice(&salt);
        content.extend_from_slice(&wrapped);

        let created = write_private_new(&self.path, &content).map_err(|e| {
            VaultError::KeyProvisioning(format!("writing key file {}: {e}", self.path.display()))
        })?;
        if !created {
            // Another provisioner published first; its key is the installation key
            tracing::debug!(path = %self.path.display(), "key file appeared during provisioning");
            return self.read_existing();
        }
        tracing::info!(
            alias = %self.alias,
            path = %self.path.display(),
            key_id = %key.key_id(),
            scheme = MASTER_KEY_SCHEME,
            "provisioned new master key file"
        );
        Ok(key)
    }

    fn read_existing(&self) -> VaultResult<MasterKey> {
        let content = fs::read(&self.path).map_err(|e| {
            VaultError::KeyProvisioning(format!("reading key file {}: {e}", self.path.display()))
        })?;
        self.load(&content)
    }
}

impl MasterKeyProvider for FileKeyProvider {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn get_or_create_key(&self) -> VaultResult<MasterKey> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| VaultError::KeyProvisioning("key file provider lock poisoned".into()))?;
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        let key = match fs::read(&self.path) {
            Ok(content) => self.load(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.provision()?,
            Err(e) => {
                return Err(VaultError::KeyProvisioning(format!(
                    "reading key file {}: {e}",
                    self.path.display()
                )))
            }
        };
        *cached = Some(key.clone());
        Ok(key)
    }
}

/// Publish `content` at `path` with owner-only permissions, unless a file is
/// already there.
///
/// The content goes to a uniquely named temp file first and is then
/// hard-linked into place, so `path` never exists half-written and an
/// existing key file is never replaced. Returns `false` when `path` already
/// existed. The temp file is removed on every outcome.
fn write_private_new(path: &Path, content: &[u8]) -> io::Result<bool> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!("tmp-{:08x}", rand::random::<u32>()));

    let result = write_private_file(&tmp_path, content).and_then(|()| {
        match fs::hard_link(&tmp_path, path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    });

    if let Err(e) = fs::remove_file(&tmp_path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %tmp_path.display(), "removing temp key file: {e}");
        }
    }
    result
}

fn write_private_file(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}
