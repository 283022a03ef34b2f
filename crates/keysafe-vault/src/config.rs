//! Non-sensitive configuration, stored as plain JSON in the data directory.
//!
//! Nothing secret ever lands here; secrets go through the
//! [`crate::store::SecretStore`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::CipherSuite;
use crate::settings_file;
use crate::store::DEFAULT_SERVICE;

const CONFIG_FILE: &str = "keysafe.json";

/// Keysafe configuration.
///
/// Persisted to `{data_dir}/keysafe.json`. Every field has a default, so a
/// partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeysafeConfig {
    /// Service name under which secrets are filed in the OS credential store.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Days without a successful authorization before local secrets are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Cipher used for sealed payloads.
    #[serde(default)]
    pub cipher_suite: CipherSuite,
}

impl Default for KeysafeConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            retention_days: default_retention_days(),
            cipher_suite: CipherSuite::default(),
        }
    }
}

fn default_service_name() -> String {
    DEFAULT_SERVICE.into()
}
const fn default_retention_days() -> u32 {
    30
}

impl KeysafeConfig {
    /// Load the configuration from `{data_dir}/keysafe.json`.
    ///
    /// Returns [`Default::default()`] when the file is missing or not valid
    /// JSON.
    #[must_use]
    pub fn load(data_dir: &Path) -> Self {
        settings_file::read_json_or_default(data_dir, CONFIG_FILE)
    }

    /// Persist the configuration to `{data_dir}/keysafe.json`.
    ///
    /// Writes a `.tmp` file and renames it over the target.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the directory does not exist or the file
    /// system rejects the write/rename.
    pub fn save(&self, data_dir: &Path) -> std::io::Result<()> {
        settings_file::write_private_json(data_dir, CONFIG_FILE, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = KeysafeConfig::default();
        assert_eq!(config.service_name, "keysafe");
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.cipher_suite, CipherSuite::Aes256Cbc);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(KeysafeConfig::load(dir.path()), KeysafeConfig::default());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let config = KeysafeConfig {
            service_name: "com.example.band".into(),
            retention_days: 7,
            cipher_suite: CipherSuite::Aes256Gcm,
        };
        config.save(dir.path()).unwrap();
        assert_eq!(KeysafeConfig::load(dir.path()), config);
        assert!(!dir.path().join(settings_file::tmp_name(CONFIG_FILE)).exists());
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{ retentionDays: ").unwrap();
        assert_eq!(KeysafeConfig::load(dir.path()), KeysafeConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"cipherSuite":"aes-256-gcm"}"#).unwrap();
        let config = KeysafeConfig::load(dir.path());
        assert_eq!(config.cipher_suite, CipherSuite::Aes256Gcm);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.service_name, "keysafe");
    }

    #[test]
    fn serde_uses_camel_case() {
        let json = serde_json::to_string(&KeysafeConfig::default()).unwrap();
        assert!(json.contains("serviceName"));
        assert!(json.contains("retentionDays"));
        assert!(json.contains("\"cipherSuite\":\"aes-256-cbc\""));
        assert!(!json.contains("retention_days"));
    }

    #[cfg(unix)]
    #[test]
    fn save_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        KeysafeConfig::default().save(dir.path()).unwrap();
        let mode = fs::metadata(dir.path().join(CONFIG_FILE))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }
}
