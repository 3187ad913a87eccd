//! Key hierarchy: master key → per-file keys, key fingerprint, master key wrapping

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::ExposeSecret;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::kdf::WrappingKey;
use crate::{KEY_SIZE, TAG_SIZE, WRAP_NONCE_SIZE};

/// Prefix of the HKDF info string for per-file keys; the file name follows.
const FILE_KEY_DOMAIN: &[u8] = b"tokenvault-file:";

const KEY_ID_DOMAIN: &[u8] = b"tokenvault-key-id";

/// The 256-bit master key protecting every encrypted file.
///
/// Zeroized on drop to prevent secrets lingering in memory. The raw bytes
/// are only reachable through [`ExposeSecret`], which keystore backends use
/// to persist the key.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Generate a fresh random master key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Non-secret fingerprint for logs: 8 hex chars derived via HKDF.
    pub fn key_id(&self) -> String {
        // Extract only: the PRK is never used as key material
        let (prk, _) = Hkdf::<Sha256>::extract(Some(KEY_ID_DOMAIN), &self.bytes);
        prk[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl ExposeSecret<[u8; KEY_SIZE]> for MasterKey {
    fn expose_secret(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A per-file 256-bit encryption key. Zeroized on drop.
pub(crate) struct FileKey {
    bytes: [u8; KEY_SIZE],
}

impl FileKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Derive the key for one file via HKDF-SHA256.
///
/// `salt` is random per written file; `associated_data` (the file name)
/// binds the ciphertext to the name it was written under.
pub(crate) fn derive_file_key(
    master: &MasterKey,
    salt: &[u8],
    associated_data: &[u8],
) -> Result<FileKey, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), &master.bytes);

    let mut info = Vec::with_capacity(FILE_KEY_DOMAIN.len() + associated_data.len());
    info.extend_from_slice(FILE_KEY_DOMAIN);
    info.extend_from_slice(associated_data);

    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(&info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(format!("HKDF expand failed: {e}")))?;
    Ok(FileKey { bytes: okm })
}

/// Wrap (encrypt) the master key under a passphrase-derived wrapping key.
///
/// Uses XChaCha20-Poly1305 with a random nonce.
/// Output: `[24-byte nonce][ciphertext + 16-byte tag]`
pub fn wrap_master_key(kek: &WrappingKey, master: &MasterKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(kek.as_bytes().into());

    let mut nonce_bytes = [0u8; WRAP_NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, master.bytes.as_ref())
        .map_err(|e| CryptoError::Cipher(format!("key wrapping failed: {e}")))?;

    let mut result = Vec::with_capacity(WRAP_NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Unwrap (decrypt) a master key.
///
/// Input: `[24-byte nonce][ciphertext + 16-byte tag]` (output of `wrap_master_key`)
pub fn unwrap_master_key(kek: &WrappingKey, wrapped: &[u8]) -> Result<MasterKey, CryptoError> {
    if wrapped.len() != WRAP_NONCE_SIZE + KEY_SIZE + TAG_SIZE {
        return Err(CryptoError::Malformed(format!(
            "wrapped key is {} bytes (expected {})",
            wrapped.len(),
            WRAP_NONCE_SIZE + KEY_SIZE + TAG_SIZE
        )));
    }

    let (nonce_bytes, ciphertext) = wrapped.split_at(WRAP_NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(kek.as_bytes().into());

    let mut plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| {
        CryptoError::Authentication("key unwrapping failed: wrong passphrase or corrupted data".into())
    })?;

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(MasterKey::from_bytes(key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::{derive_wrapping_key, KdfParams, KDF_SALT_SIZE};
    use secrecy::SecretString;

    fn test_kek(passphrase: &str) -> WrappingKey {
        let params = KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        };
        derive_wrapping_key(
            &SecretString::from(passphrase),
            &[7u8; KDF_SALT_SIZE],
            &params,
        )
        .unwrap()
    }

    #[test]
    fn test_master_key_generation() {
        let k1 = MasterKey::generate();
        let k2 = MasterKey::generate();
        assert_ne!(k1.expose_secret(), k2.expose_secret(), "random keys must differ");
    }

    #[test]
    fn test_key_id_is_stable_and_short() {
        let key = MasterKey::from_bytes([42u8; KEY_SIZE]);
        assert_eq!(key.key_id(), key.clone().key_id());
        assert_eq!(key.key_id().len(), 8);
        assert_ne!(key.key_id(), MasterKey::from_bytes([43u8; KEY_SIZE]).key_id());
    }

    #[test]
    fn test_key_id_is_hkdf_fingerprint_not_key_prefix() {
        let key = MasterKey::from_bytes([0xABu8; KEY_SIZE]);
        let id = key.key_id();

        let (prk, _) = Hkdf::<Sha256>::extract(Some(KEY_ID_DOMAIN), &[0xABu8; KEY_SIZE]);
        let expected: String = prk[..4].iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(id, expected);
        assert_ne!(id, "abababab");
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_file_keys_bound_to_salt_and_name() {
        let master = MasterKey::from_bytes([42u8; KEY_SIZE]);
        let a = derive_file_key(&master, &[1u8; 32], b"tokens").unwrap();
        let b = derive_file_key(&master, &[2u8; 32], b"tokens").unwrap();
        let c = derive_file_key(&master, &[1u8; 32], b"other").unwrap();
        let a2 = derive_file_key(&master, &[1u8; 32], b"tokens").unwrap();

        assert_eq!(a.as_bytes(), a2.as_bytes());
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let kek = test_kek("hunter2");
        let master = MasterKey::generate();

        let wrapped = wrap_master_key(&kek, &master).unwrap();
        assert_eq!(wrapped.len(), WRAP_NONCE_SIZE + KEY_SIZE + TAG_SIZE);

        let unwrapped = unwrap_master_key(&kek, &wrapped).unwrap();
        assert_eq!(master.expose_secret(), unwrapped.expose_secret());
    }

    #[test]
    fn test_unwrap_wrong_passphrase() {
        let master = MasterKey::generate();
        let wrapped = wrap_master_key(&test_kek("right"), &master).unwrap();

        let result = unwrap_master_key(&test_kek("wrong"), &wrapped);
        assert!(matches!(result, Err(CryptoError::Authentication(_))));
    }

    #[test]
    fn test_unwrap_rejects_bad_length() {
        let result = unwrap_master_key(&test_kek("p"), &[0u8; 10]);
        assert!(matches!(result, Err(CryptoError::Malformed(_))));
    }

    #[test]
    fn test_debug_redacts() {
        let key = MasterKey::from_bytes([9u8; KEY_SIZE]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains('9'));
    }
}
