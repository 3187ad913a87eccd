//! tokenvault-crypto: at-rest encryption for tokenvault
//!
//! Scheme: `AES256_GCM_HKDF_4KB` streaming AEAD
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, random, held by a MasterKeyProvider)
//!   ├── File Key (HKDF-SHA256, salt = random per file, info = "tokenvault-file:" || name)
//!   │   └── Segment AEAD: AES-256-GCM (nonce = prefix || index || last, AAD = stream header)
//!   └── Key ID (HKDF-SHA256, info = "tokenvault-key-id"; non-secret log fingerprint)
//!
//! Wrapping Key (Argon2id from passphrase, software keystore only)
//!   └── wraps Master Key with XChaCha20-Poly1305
//! ```

pub mod error;
pub mod kdf;
pub mod keys;
pub mod stream;

pub use error::CryptoError;
pub use kdf::{derive_wrapping_key, KdfParams, WrappingKey};
pub use keys::{unwrap_master_key, wrap_master_key, MasterKey};
pub use stream::{ciphertext_len, decrypt_bytes, encrypt_bytes, DecryptingReader, EncryptingWriter};

/// Size of a master / file key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM or Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of an XChaCha20-Poly1305 nonce (192-bit), used for key wrapping
pub const WRAP_NONCE_SIZE: usize = 24;

/// Scheme identifier recorded for the master key
pub const MASTER_KEY_SCHEME: &str = "AES256_GCM";

/// Scheme identifier recorded for encrypted files
pub const FILE_SCHEME: &str = "AES256_GCM_HKDF_4KB";
