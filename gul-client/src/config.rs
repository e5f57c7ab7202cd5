// gul-client/src/config.rs
// ============================================================================
// Module: GUL Client Configuration
// Description: Client settings with fail-closed validation and defaults.
// Purpose: Parse and validate the options an embedded client recognizes.
// Dependencies: gul-core, serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! Configuration is a JSON document. A missing public key fails validation
//! unless verification is explicitly disabled, and disabling verification
//! is loud: it logs a warning every time the config validates.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use gul_core::PublicKey;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::SyncError;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default auto-sync period in seconds.
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
/// Default per-request HTTP timeout in seconds.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// Default artifact download ceiling in bytes.
const DEFAULT_MAX_DOWNLOAD_SIZE: u64 = 100 * 1024 * 1024;
/// Default user agent sent on every request.
const DEFAULT_USER_AGENT: &str = "GUL-Client/1.0";
/// Default number of fetch attempts for transient failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

const fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

const fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

const fn default_max_download_size() -> u64 {
    DEFAULT_MAX_DOWNLOAD_SIZE
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the embedded geofence client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Absolute URL of the manifest object to poll.
    pub manifest_url: String,
    /// Publisher Ed25519 public key, lowercase hex.
    #[serde(default)]
    pub public_key_hex: String,
    /// Path of the local fence store.
    pub store_path: PathBuf,
    /// Auto-sync period in seconds.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Artifact download ceiling in bytes.
    #[serde(default = "default_max_download_size")]
    pub max_download_size: u64,
    /// User agent sent on every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Number of fetch attempts for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Accept manifests without signature verification. A safety hazard:
    /// validation logs a warning whenever this is set.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl ClientConfig {
    /// Creates a configuration with defaults for everything optional.
    #[must_use]
    pub fn new(manifest_url: impl Into<String>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            public_key_hex: String::new(),
            store_path: store_path.into(),
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_download_size: DEFAULT_MAX_DOWNLOAD_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            insecure_skip_verify: false,
        }
    }

    /// Validates the configuration, failing closed on anything missing.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] when a required option is
    /// absent or malformed.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.manifest_url.is_empty() {
            return Err(SyncError::InvalidConfig("manifest_url is required".to_string()));
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(SyncError::InvalidConfig("store_path is required".to_string()));
        }
        if self.public_key_hex.is_empty() {
            if !self.insecure_skip_verify {
                return Err(SyncError::InvalidConfig(
                    "public_key_hex is required (set insecure_skip_verify to disable \
                     verification; never do this in production)"
                        .to_string(),
                ));
            }
        } else {
            self.public_key()?;
        }
        if self.insecure_skip_verify {
            tracing::warn!(
                "signature verification is DISABLED; manifests will be accepted unverified"
            );
        }
        if self.sync_interval_secs == 0 {
            return Err(SyncError::InvalidConfig("sync_interval_secs must be positive".to_string()));
        }
        if self.http_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig("http_timeout_secs must be positive".to_string()));
        }
        if self.max_download_size == 0 {
            return Err(SyncError::InvalidConfig("max_download_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Returns the configured public key, when one is set.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] on malformed key material.
    pub fn public_key(&self) -> Result<Option<PublicKey>, SyncError> {
        if self.public_key_hex.is_empty() {
            return Ok(None);
        }
        let key = PublicKey::from_hex(&self.public_key_hex)
            .map_err(|err| SyncError::InvalidConfig(format!("public_key_hex: {err}")))?;
        Ok(Some(key))
    }

    /// Auto-sync period as a duration.
    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Per-request timeout as a duration.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] on read, parse, or validation
    /// failure.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let bytes = std::fs::read(path)
            .map_err(|err| SyncError::InvalidConfig(format!("read {}: {err}", path.display())))?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|err| SyncError::InvalidConfig(format!("parse {}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] on encode or write failure.
    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|err| SyncError::InvalidConfig(format!("encode config: {err}")))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| SyncError::InvalidConfig(format!("create config dir: {err}")))?;
            }
        }
        std::fs::write(path, bytes)
            .map_err(|err| SyncError::InvalidConfig(format!("write {}: {err}", path.display())))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use gul_core::KeyPair;

    fn valid_config() -> ClientConfig {
        let pair = KeyPair::generate().expect("keypair");
        let mut config = ClientConfig::new("https://cdn.example.com/geofence/manifest.json", "/tmp/fences.db");
        config.public_key_hex = pair.public_key().to_hex();
        config
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().expect("valid");
    }

    #[test]
    fn missing_manifest_url_fails() {
        let mut config = valid_config();
        config.manifest_url.clear();
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn missing_public_key_fails_unless_insecure() {
        let mut config = valid_config();
        config.public_key_hex.clear();
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        config.insecure_skip_verify = true;
        config.validate().expect("insecure skip accepted");
    }

    #[test]
    fn malformed_public_key_fails() {
        let mut config = valid_config();
        config.public_key_hex = "not hex".to_string();
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn defaults_applied_on_parse() {
        let json = r#"{
            "manifest_url": "https://cdn.example.com/manifest.json",
            "public_key_hex": "",
            "store_path": "/tmp/fences.db",
            "insecure_skip_verify": true
        }"#;
        let config: ClientConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.max_download_size, 100 * 1024 * 1024);
        assert_eq!(config.user_agent, "GUL-Client/1.0");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn load_save_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("client.json");
        let config = valid_config();
        config.save(&path).expect("save");
        let loaded = ClientConfig::load(&path).expect("load");
        assert_eq!(loaded.manifest_url, config.manifest_url);
        assert_eq!(loaded.public_key_hex, config.public_key_hex);
    }
}
