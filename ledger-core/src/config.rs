//! Configuration for the ledger
//!
//! Optional capabilities are switched on here, at startup, and never
//! inferred from what the store happens to contain.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::retention::MAX_RETENTION_YEARS;
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Append path configuration
    pub chain: ChainConfig,

    /// Retention table overrides
    pub retention: RetentionConfig,

    /// Optional capabilities
    pub features: FeatureConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "ledger-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            chain: ChainConfig::default(),
            retention: RetentionConfig::default(),
            features: FeatureConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Append path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Retries after a chain-tail conflict before giving up
    pub max_append_retries: u32,

    /// Initial backoff between retries (milliseconds, doubled per attempt)
    pub retry_backoff_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_append_retries: 5,
            retry_backoff_ms: 2,
        }
    }
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Years for unknown resource types (raised to the longest class if lower)
    pub default_years: u32,

    /// Resource type → years
    pub overrides: HashMap<String, u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_years: 10,
            overrides: HashMap::new(),
        }
    }
}

/// Optional capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Accept subject anonymization entries
    pub anonymization: bool,

    /// Every entry must carry a valid seal; unsealed entries fail verification
    pub require_seals: bool,

    /// Hex Ed25519 public key seals are verified against
    pub verifying_key: Option<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            anonymization: true,
            require_seals: false,
            verifying_key: None,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(retries) = std::env::var("LEDGER_MAX_APPEND_RETRIES") {
            config.chain.max_append_retries = retries.parse().map_err(|e| {
                crate::Error::Config(format!("LEDGER_MAX_APPEND_RETRIES: {}", e))
            })?;
        }

        if let Ok(flag) = std::env::var("LEDGER_ANONYMIZATION") {
            config.features.anonymization = flag.parse().map_err(|e| {
                crate::Error::Config(format!("LEDGER_ANONYMIZATION: {}", e))
            })?;
        }

        if let Ok(flag) = std::env::var("LEDGER_REQUIRE_SEALS") {
            config.features.require_seals = flag.parse().map_err(|e| {
                crate::Error::Config(format!("LEDGER_REQUIRE_SEALS: {}", e))
            })?;
        }

        if let Ok(key) = std::env::var("LEDGER_VERIFYING_KEY") {
            config.features.verifying_key = Some(key);
        }

        config.validate()?;
        Ok(config)
    }

    /// Decoded seal verifying key, if configured
    pub fn verifying_key(&self) -> crate::Result<Option<[u8; 32]>> {
        let Some(key) = &self.features.verifying_key else {
            return Ok(None);
        };
        let bytes = hex::decode(key.trim())
            .map_err(|e| crate::Error::Config(format!("verifying_key is not hex: {}", e)))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| crate::Error::Config("verifying_key must be 32 bytes".to_string()))?;
        Ok(Some(key))
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> crate::Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(crate::Error::Config("data_dir must be set".to_string()));
        }
        self.verifying_key()?;
        if self.retention.default_years > MAX_RETENTION_YEARS {
            return Err(crate::Error::Config(format!(
                "retention default_years must be at most {}",
                MAX_RETENTION_YEARS
            )));
        }
        for (name, years) in &self.retention.overrides {
            if !(1..=MAX_RETENTION_YEARS).contains(years) {
                return Err(crate::Error::Config(format!(
                    "retention override for {} must be between 1 and {} years",
                    name, MAX_RETENTION_YEARS
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "ledger-core");
        assert_eq!(config.chain.max_append_retries, 5);
        assert_eq!(config.retention.default_years, 10);
        assert!(config.features.anonymization);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/var/lib/ledger"

[features]
anonymization = false

[retention.overrides]
Receipt = 10
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/ledger"));
        assert!(!config.features.anonymization);
        assert_eq!(config.retention.overrides.get("Receipt"), Some(&10));
        assert_eq!(config.chain.max_append_retries, 5);
    }

    #[test]
    fn test_zero_year_override_rejected() {
        let mut config = Config::default();
        config.retention.overrides.insert("Invoice".into(), 0);
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_verifying_key_decoding() {
        let mut config = Config::default();
        assert_eq!(config.verifying_key().unwrap(), None);

        config.features.verifying_key = Some("ab".repeat(32));
        assert_eq!(config.verifying_key().unwrap(), Some([0xab; 32]));

        config.features.verifying_key = Some("abcd".into());
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_oversized_retention_rejected() {
        let mut config = Config::default();
        config.retention.overrides.insert("Invoice".into(), u32::MAX);
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let mut config = Config::default();
        config.retention.default_years = MAX_RETENTION_YEARS + 1;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let mut config = Config::default();
        config.retention.overrides.insert("Invoice".into(), MAX_RETENTION_YEARS);
        assert!(config.validate().is_ok());
    }
}
