use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Top-level configuration (loaded from tokenvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub storage: StorageConfig,
    pub keystore: KeystoreConfig,
    pub secret: SecretConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Application-private directory holding the encrypted files
    pub data_dir: PathBuf,
}

/// Which secure key facility backs the master key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeystoreBackend {
    /// Platform keychain (macOS Keychain, Secret Service, Windows Credential Manager)
    Keychain,
    /// Passphrase-wrapped key file
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    pub backend: KeystoreBackend,
    /// Keychain service name (default: tokenvault)
    pub service: String,
    /// Alias of the master key entry (default: master-key)
    pub alias: String,
    /// Wrapped key file for the `file` backend (default: <data_dir>/master.key)
    pub key_file: Option<PathBuf>,
    /// Environment variable holding the passphrase for the `file` backend
    pub passphrase_env: String,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretConfig {
    /// Literal label the stored file name is derived from
    pub label: String,
    /// Code point shift applied to `label`. Obfuscation only.
    pub shift: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.local/share/tokenvault"),
        }
    }
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            backend: KeystoreBackend::Keychain,
            service: "tokenvault".into(),
            alias: "master-key".into(),
            key_file: None,
            passphrase_env: "TOKENVAULT_PASSPHRASE".into(),
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            label: "tokens".into(),
            shift: 15,
        }
    }
}

impl VaultConfig {
    /// Parse a config from TOML text.
    pub fn from_toml(content: &str) -> VaultResult<Self> {
        toml::from_str(content).map_err(|e| VaultError::Config(format!("parsing config: {e}")))
    }

    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                VaultError::Config(format!("reading config {}: {e}", path.display()))
            })?;
            toml::from_str(&content)
                .map_err(|e| VaultError::Config(format!("parsing config {}: {e}", path.display())))
        } else {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Storage directory with `~/` expanded.
    pub fn data_dir(&self) -> VaultResult<PathBuf> {
        expand_tilde(&self.storage.data_dir)
    }

    /// Key file path for the `file` backend with `~/` expanded.
    pub fn key_file(&self) -> VaultResult<PathBuf> {
        match &self.keystore.key_file {
            Some(path) => expand_tilde(path),
            None => Ok(self.data_dir()?.join("master.key")),
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> VaultResult<PathBuf> {
    expand_tilde_from(path, std::env::var_os("HOME"))
}

fn expand_tilde_from(path: &Path, home: Option<OsString>) -> VaultResult<PathBuf> {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => match home.filter(|h| !h.is_empty()) {
            Some(home) => Ok(PathBuf::from(home).join(rest)),
            None => Err(VaultError::Config(format!(
                "cannot expand {}: HOME is not set",
                path.display()
            ))),
        },
        None => Ok(path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[storage]
data_dir = "/var/lib/app/private"

[keystore]
backend = "file"
service = "com.example.app"
alias = "app-master"
key_file = "/var/lib/app/master.key"
passphrase_env = "APP_PASSPHRASE"
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8

[secret]
label = "session"
shift = 3
"#;
        let config = VaultConfig::from_toml(toml_str).unwrap();

        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/var/lib/app/private"));
        assert_eq!(config.keystore.backend, KeystoreBackend::File);
        assert_eq!(config.keystore.service, "com.example.app");
        assert_eq!(config.keystore.alias, "app-master");
        assert_eq!(config.key_file().unwrap(), PathBuf::from("/var/lib/app/master.key"));
        assert_eq!(config.keystore.passphrase_env, "APP_PASSPHRASE");
        assert_eq!(config.keystore.argon2_mem_cost_kib, 131072);
        assert_eq!(config.secret.label, "session");
        assert_eq!(config.secret.shift, 3);
    }

    #[test]
    fn test_parse_defaults() {
        let config = VaultConfig::from_toml("").unwrap();

        assert_eq!(config.keystore.backend, KeystoreBackend::Keychain);
        assert_eq!(config.keystore.service, "tokenvault");
        assert_eq!(config.keystore.alias, "master-key");
        assert_eq!(config.keystore.argon2_time_cost, 3);
        assert_eq!(config.secret.label, "tokens");
        assert_eq!(config.secret.shift, 15);
        assert!(!config.data_dir().unwrap().to_string_lossy().starts_with("~/"));
    }

    #[test]
    fn test_key_file_defaults_into_data_dir() {
        let toml_str = r#"
[storage]
data_dir = "/srv/vault"
"#;
        let config = VaultConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.key_file().unwrap(), PathBuf::from("/srv/vault/master.key"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = VaultConfig::from_toml("[keystore]\nbackend = \"tpm\"\n").unwrap_err();
        assert!(matches!(err, VaultError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.secret.label, "tokens");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenvault.toml");
        std::fs::write(&path, "[secret]\nlabel = \"api\"\n").unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.secret.label, "api");
        assert_eq!(config.secret.shift, 15);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = VaultConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = VaultConfig::from_toml(&toml_str).unwrap();

        assert_eq!(config.storage.data_dir, parsed.storage.data_dir);
        assert_eq!(config.keystore.backend, parsed.keystore.backend);
        assert_eq!(config.secret.label, parsed.secret.label);
    }

    #[test]
    fn test_tilde_without_home_is_config_error() {
        let path = Path::new("~/.local/share/tokenvault");

        let err = expand_tilde_from(path, None).unwrap_err();
        assert!(matches!(err, VaultError::Config(m) if m.contains("HOME")));
        assert!(expand_tilde_from(path, Some(OsString::new())).is_err());
    }

    #[test]
    fn test_tilde_expansion_uses_home() {
        let expanded =
            expand_tilde_from(Path::new("~/vault"), Some(OsString::from("/home/u"))).unwrap();
        assert_eq!(expanded, PathBuf::from("/home/u/vault"));

        // Absolute and relative paths pass through without needing HOME
        let abs = expand_tilde_from(Path::new("/srv/vault"), None).unwrap();
        assert_eq!(abs, PathBuf::from("/srv/vault"));
    }
}
