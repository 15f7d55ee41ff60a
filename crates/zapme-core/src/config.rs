use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ZapmeError, ZapmeResult};

/// Top-level device configuration (loaded from zapme.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZapmeConfig {
    pub storage: StorageConfig,
    pub keystore: KeyStoreConfig,
    pub logging: LoggingConfig,
    pub access_point: AccessPointConfig,
}

impl ZapmeConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> ZapmeResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| ZapmeError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Host directory mounted as the SD card root
    pub root: PathBuf,
}

/// Persistent key-record store (emulated flash sector)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Flash image file holding the key record at offset 0
    pub path: PathBuf,
    /// Size of the emulated sector in bytes (default: 4096)
    pub sector_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Access point credentials bootstrap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPointConfig {
    /// Encrypted credentials file on the SD card
    pub credentials_file: String,
    /// SSID written when no credentials file can be read
    pub default_ssid: String,
    /// Pre-shared key written when no credentials file can be read
    pub default_psk: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./sdcard"),
        }
    }
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./flash.bin"),
            sector_size: 4096,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            credentials_file: "/config/ap-creds.bin".into(),
            default_ssid: "ZapMe".into(),
            default_psk: "12345678".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[storage]
root = "/mnt/sd"

[keystore]
path = "/var/lib/zapme/flash.bin"
sector_size = 8192

[logging]
level = "debug"
format = "json"

[access_point]
credentials_file = "/config/ap.bin"
default_ssid = "TestAP"
default_psk = "ZapMe12345"
"#;
        let config: ZapmeConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.storage.root, PathBuf::from("/mnt/sd"));
        assert_eq!(config.keystore.path, PathBuf::from("/var/lib/zapme/flash.bin"));
        assert_eq!(config.keystore.sector_size, 8192);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.access_point.credentials_file, "/config/ap.bin");
        assert_eq!(config.access_point.default_ssid, "TestAP");
        assert_eq!(config.access_point.default_psk, "ZapMe12345");
    }

    #[test]
    fn test_parse_defaults() {
        let config: ZapmeConfig = toml::from_str("").unwrap();

        assert_eq!(config.storage.root, PathBuf::from("./sdcard"));
        assert_eq!(config.keystore.sector_size, 4096);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
        assert_eq!(config.access_point.credentials_file, "/config/ap-creds.bin");
        assert_eq!(config.access_point.default_ssid, "ZapMe");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[keystore]
path = "/tmp/flash.bin"
"#;
        let config: ZapmeConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.keystore.path, PathBuf::from("/tmp/flash.bin"));
        // Defaults
        assert_eq!(config.keystore.sector_size, 4096);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = ZapmeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ZapmeConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.root, parsed.storage.root);
        assert_eq!(config.keystore.path, parsed.keystore.path);
        assert_eq!(config.access_point.default_psk, parsed.access_point.default_psk);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ZapmeConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zapme.toml");
        std::fs::write(&path, "[keystore]\nsector_size = \"big\"\n").unwrap();

        let err = ZapmeConfig::load(&path).unwrap_err();
        assert!(matches!(err, ZapmeError::Config(_)));
    }
}
