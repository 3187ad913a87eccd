use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// A segment or wrapped key failed tag verification.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("truncated ciphertext: {0}")]
    Truncated(String),

    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// True when the ciphertext (or the key used on it) cannot be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::Authentication(_) | CryptoError::Malformed(_) | CryptoError::Truncated(_)
        )
    }
}
