//! Encrypted file store: one authenticated, streamed ciphertext per name.
//!
//! Every write deletes the previous file and creates a fresh one, because
//! the stream's final tag covers the whole file; there is no append or
//! in-place update. Files live in a directory created with mode 0700 and are
//! themselves created with mode 0600.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokenvault_core::{VaultError, VaultResult};
use tokenvault_crypto::{CryptoError, DecryptingReader, EncryptingWriter, MasterKey, FILE_SCHEME};
use zeroize::Zeroizing;

use crate::names::validate_file_name;
use crate::provider::MasterKeyProvider;

/// Storage operations performed so far; lets callers observe cache behavior.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

pub struct EncryptedFileStore {
    dir: PathBuf,
    provider: Arc<dyn MasterKeyProvider>,
    counters: Counters,
}

impl EncryptedFileStore {
    pub fn new(dir: impl Into<PathBuf>, provider: Arc<dyn MasterKeyProvider>) -> Self {
        Self {
            dir: dir.into(),
            provider,
            counters: Counters::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn provider(&self) -> &Arc<dyn MasterKeyProvider> {
        &self.provider
    }

    /// Path of the ciphertext for `name`.
    pub fn path_for(&self, name: &str) -> VaultResult<PathBuf> {
        validate_file_name(name)?;
        Ok(self.dir.join(name))
    }

    pub fn exists(&self, name: &str) -> VaultResult<bool> {
        Ok(self.path_for(name)?.is_file())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
        }
    }

    /// Replace the file at `name` with an encryption of `content`.
    pub fn write(&self, name: &str, content: &[u8]) -> VaultResult<()> {
        self.write_from(name, content).map(|_| ())
    }

    /// Replace the file at `name` with an encryption of everything `reader`
    /// yields. Returns the plaintext byte count.
    ///
    /// The key is obtained before the old file is touched, so a keystore
    /// failure leaves the previous ciphertext in place. Once the old file is
    /// deleted, any later failure removes the partial new file: a reader then
    /// sees `NotFound`, never a torn stream.
    pub fn write_from(&self, name: &str, reader: impl Read) -> VaultResult<u64> {
        let path = self.path_for(name)?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);

        let key = self.provider.get_or_create_key()?;
        self.ensure_dir()?;

        let replaced = remove_if_exists(&path)?;
        let file = create_private(&path)?;

        match encrypt_into(file, &key, name, reader) {
            Ok(bytes) => {
                tracing::debug!(
                    name = %name.escape_debug(),
                    bytes,
                    replaced,
                    scheme = FILE_SCHEME,
                    key_id = %key.key_id(),
                    "wrote encrypted file"
                );
                Ok(bytes)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), "removing partial file failed: {rm}");
                }
                Err(e)
            }
        }
    }

    /// Decrypt the file at `name`. Data is returned only after every segment,
    /// including the final one, has verified.
    pub fn read(&self, name: &str) -> VaultResult<Vec<u8>> {
        let mut plaintext = Zeroizing::new(Vec::new());
        self.read_into(name, &mut *plaintext)?;
        Ok(std::mem::take(&mut *plaintext))
    }

    /// Stream the decryption of `name` into `writer`. Returns the plaintext
    /// byte count.
    ///
    /// Each segment is verified before it is written, but segments already
    /// written stay written if a later one fails; use [`read`] when nothing
    /// may be released before the whole file verifies.
    ///
    /// [`read`]: EncryptedFileStore::read
    pub fn read_into(&self, name: &str, mut writer: impl Write) -> VaultResult<u64> {
        let path = self.path_for(name)?;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(VaultError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let key = self.provider.get_or_create_key()?;

        let mut reader = DecryptingReader::new(BufReader::new(file), &key, name.as_bytes())
            .map_err(|e| crypto_error(name, e))?;
        let mut total = 0u64;
        while let Some(segment) = reader.next_segment().map_err(|e| crypto_error(name, e))? {
            writer.write_all(&segment)?;
            total += segment.len() as u64;
        }
        writer.flush()?;

        tracing::debug!(
            name = %name.escape_debug(),
            bytes = total,
            key_id = %key.key_id(),
            "read encrypted file"
        );
        Ok(total)
    }

    /// Remove the file at `name`. Returns whether a file was removed.
    pub fn delete(&self, name: &str) -> VaultResult<bool> {
        let path = self.path_for(name)?;
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        let removed = remove_if_exists(&path)?;
        tracing::debug!(name = %name.escape_debug(), removed, "delete encrypted file");
        Ok(removed)
    }

    fn ensure_dir(&self) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&self.dir)
    }
}

fn encrypt_into(file: File, key: &MasterKey, name: &str, mut reader: impl Read) -> VaultResult<u64> {
    let mut writer = EncryptingWriter::new(BufWriter::new(file), key, name.as_bytes())
        .map_err(|e| crypto_error(name, e))?;
    io::copy(&mut reader, &mut writer)?;
    let bytes = writer.plaintext_len();

    let buffered = writer.finish().map_err(|e| crypto_error(name, e))?;
    let file = buffered.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(bytes)
}

fn create_private(path: &Path) -> io::Result<File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Integrity and framing failures become `Authentication`; the rest keep
/// their kind.
fn crypto_error(name: &str, err: CryptoError) -> VaultError {
    match err {
        CryptoError::Io(e) => VaultError::Io(e),
        e if e.is_integrity_failure() => VaultError::Authentication {
            name: name.to_string(),
            reason: e.to_string(),
        },
        e => VaultError::Crypto(e.to_string()),
    }
}
