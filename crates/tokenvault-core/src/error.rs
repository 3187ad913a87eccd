use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// The secure key store is unavailable or holds unusable key material.
    #[error("key provisioning error: {0}")]
    KeyProvisioning(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Integrity check failed: tampered, truncated, renamed, or wrong key.
    #[error("authentication failed for '{name}': {reason}")]
    Authentication { name: String, reason: String },

    #[error("no encrypted file named '{0}'")]
    NotFound(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("invalid file name '{0}'")]
    InvalidName(String),

    /// Decrypted content verified but is not valid UTF-8.
    #[error("stored secret '{0}' is not valid UTF-8")]
    Corrupt(String),

    #[error("config error: {0}")]
    Config(String),
}

impl VaultError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::NotFound(_))
    }
}
