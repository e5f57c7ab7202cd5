// gul-publisher/src/lib.rs
// ============================================================================
// Module: GUL Publisher
// Description: Produces signed, versioned geofence artifacts for a CDN.
// Purpose: Sign every fence, commit the set to a Merkle root, serialize the
//          snapshot, compute the framed delta, and stage artifacts so a
//          manifest never references files that are not yet durable.
// Dependencies: gul-core, gul-store-sqlite, serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! Publishing version N writes three artifacts: `manifest.json`, `v{N}.bin`
//! (the canonical snapshot), and `patches/v{N-1}_to_v{N}.bin` when a prior
//! snapshot exists to diff against. Artifacts are written to temporary files
//! and renamed into place, snapshot and delta before the manifest, so a
//! reader polling the output directory never observes a manifest pointing at
//! missing files. The authoring store records the new manifest, version,
//! and snapshot bytes in one transaction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use gul_core::CryptoError;
use gul_core::FenceCollection;
use gul_core::FenceError;
use gul_core::FenceItem;
use gul_core::KeyPair;
use gul_core::Manifest;
use gul_core::ManifestError;
use gul_core::MerkleError;
use gul_core::MerkleTree;
use gul_core::PROTOCOL_VERSION;
use gul_core::SnapshotError;
use gul_core::compute_sha256;
use gul_core::delta::frame_diff;
use gul_core::encode_snapshot;
use gul_store_sqlite::SqliteStore;
use gul_store_sqlite::StoreConfig;
use gul_store_sqlite::StoreError;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the publisher pipeline.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Misconfiguration; surfaced immediately.
    #[error("invalid publisher config: {0}")]
    InvalidConfig(String),
    /// Authoring store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Key material failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Fence validation or signing failure.
    #[error(transparent)]
    Fence(#[from] FenceError),
    /// Merkle commitment failure.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// Manifest construction failure.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// Snapshot codec failure.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// Artifact staging failure.
    #[error("artifact io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Ed25519 private key seed, lowercase hex.
    pub private_key_hex: String,
    /// Expected key identifier; derived from the key when absent. When
    /// present it must match the derived value.
    #[serde(default)]
    pub key_id: Option<String>,
    /// Directory receiving staged artifacts.
    pub output_dir: PathBuf,
    /// Public base URL the artifacts will be served under.
    pub cdn_base_url: String,
    /// Directory holding the previous version's artifacts, used to seed
    /// delta computation when the authoring store has no snapshot yet.
    #[serde(default)]
    pub previous_dir: Option<PathBuf>,
    /// Starting version for a freshly seeded authoring store.
    #[serde(default)]
    pub current_version: Option<u64>,
    /// Authoring store path; defaults to `geofence.db` in the output dir.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl PublisherConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::InvalidConfig`] when required options are
    /// absent.
    pub fn validate(&self) -> Result<(), PublishError> {
        if self.private_key_hex.is_empty() {
            return Err(PublishError::InvalidConfig("private_key_hex is required".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(PublishError::InvalidConfig("output_dir is required".to_string()));
        }
        if self.cdn_base_url.is_empty() {
            return Err(PublishError::InvalidConfig("cdn_base_url is required".to_string()));
        }
        Ok(())
    }

    /// Resolves the authoring store path.
    #[must_use]
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(|| self.output_dir.join("geofence.db"))
    }
}

// ============================================================================
// SECTION: Publish Result
// ============================================================================

/// Result of one publish run.
#[derive(Debug, Clone)]
pub struct PublishResult {
    /// Version that was published.
    pub version: u64,
    /// Version before this run.
    pub previous_version: u64,
    /// Path of the staged manifest.
    pub manifest_path: PathBuf,
    /// Path of the staged snapshot.
    pub snapshot_path: PathBuf,
    /// Path of the staged delta, when one was produced.
    pub delta_path: Option<PathBuf>,
    /// Number of fences in the published set.
    pub fences_count: usize,
    /// Snapshot artifact size in bytes.
    pub snapshot_size: u64,
    /// Delta artifact size in bytes, when one was produced.
    pub delta_size: Option<u64>,
}

// ============================================================================
// SECTION: Publisher
// ============================================================================

/// The publisher: owns the authoring store and the signing key.
pub struct Publisher {
    config: PublisherConfig,
    store: SqliteStore,
    key_pair: KeyPair,
    current_version: u64,
}

impl Publisher {
    /// Opens a publisher over the configured authoring store.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] on configuration, key, or store failure.
    pub fn open(config: PublisherConfig) -> Result<Self, PublishError> {
        config.validate()?;
        let key_pair = KeyPair::from_hex(&config.private_key_hex)?;
        if let Some(declared) = &config.key_id {
            let derived = key_pair.key_id();
            if *declared != derived {
                return Err(PublishError::InvalidConfig(format!(
                    "key_id {declared} does not match the private key (derived {derived})"
                )));
            }
        }

        std::fs::create_dir_all(&config.output_dir)
            .map_err(|err| PublishError::Io(format!("create output dir: {err}")))?;
        let store = SqliteStore::open(&StoreConfig::new(config.resolved_store_path()))?;
        let mut current_version = store.get_version()?;
        if current_version == 0 {
            if let Some(seed) = config.current_version {
                store.set_version(seed)?;
                current_version = seed;
            }
        }

        Ok(Self {
            config,
            store,
            key_pair,
            current_version,
        })
    }

    /// Current authoring store version.
    #[must_use]
    pub const fn current_version(&self) -> u64 {
        self.current_version
    }

    /// Public key of the signing pair, for distribution to clients.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        self.key_pair.public_key().to_hex()
    }

    /// Key identifier of the signing pair.
    #[must_use]
    pub fn key_id(&self) -> String {
        self.key_pair.key_id()
    }

    /// Public URL an artifact will be served under after CDN upload.
    #[must_use]
    pub fn artifact_url(&self, relative: &str) -> String {
        format!(
            "{}/{}",
            self.config.cdn_base_url.trim_end_matches('/'),
            relative.trim_start_matches('/')
        )
    }

    /// Signs a fence and adds it to the authoring store.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] on validation, signing, or store failure.
    pub fn sign_and_add(&self, fence: &mut FenceItem) -> Result<(), PublishError> {
        fence.validate()?;
        fence.sign(&self.key_pair)?;
        self.store.add_fence(fence)?;
        Ok(())
    }

    /// Signs a fence and updates it in the authoring store.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Store`] with a not-found kind when the fence
    /// does not exist.
    pub fn sign_and_update(&self, fence: &mut FenceItem) -> Result<(), PublishError> {
        fence.validate()?;
        fence.sign(&self.key_pair)?;
        self.store.update_fence(fence)?;
        Ok(())
    }

    /// Removes a fence from the authoring store.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Store`] on failure.
    pub fn delete_fence(&self, id: &str) -> Result<(), PublishError> {
        self.store.delete_fence(id)?;
        Ok(())
    }

    /// Retrieves a fence from the authoring store.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Store`] on failure.
    pub fn get_fence(&self, id: &str) -> Result<FenceItem, PublishError> {
        Ok(self.store.get_fence(id)?)
    }

    /// Lists all fences in the authoring store, highest priority first.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Store`] on failure.
    pub fn list_fences(&self) -> Result<Vec<FenceItem>, PublishError> {
        Ok(self.store.list_fences()?)
    }

    /// Publishes the current authoring fence set as a new version.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] on any pipeline failure; the output
    /// directory and store are only advanced on full success.
    pub fn publish(&mut self) -> Result<PublishResult, PublishError> {
        let fences = self.store.list_fences()?;
        self.publish_fences(fences)
    }

    /// Publishes an explicit fence set as a new version.
    ///
    /// Every fence is (re)signed with the publisher key; the authoring
    /// store's fence table is replaced by the published set.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] on any pipeline failure.
    pub fn publish_fences(&mut self, mut fences: Vec<FenceItem>) -> Result<PublishResult, PublishError> {
        let previous_version = self.current_version;
        let new_version = previous_version + 1;

        for fence in &mut fences {
            fence.validate()?;
            fence.sign(&self.key_pair)?;
        }

        let tree = MerkleTree::build(&fences)?;
        let root_hash = tree.root();

        let collection = FenceCollection {
            items: fences.clone(),
            created_ts: unix_now(),
            version: new_version.to_string(),
        };
        let snapshot_bytes = encode_snapshot(&collection)?;
        let snapshot_hash = compute_sha256(&snapshot_bytes);
        let snapshot_name = format!("v{new_version}.bin");

        // Frame a delta when the prior snapshot bytes are available.
        let prior_snapshot = self.prior_snapshot_bytes(previous_version)?;
        let delta = prior_snapshot.map(|old| {
            let frame = frame_diff(&old, &snapshot_bytes, previous_version, new_version);
            let bytes = frame.encode();
            let name = format!("patches/v{previous_version}_to_v{new_version}.bin");
            (name, bytes)
        });

        let mut manifest = Manifest {
            version: new_version,
            timestamp: unix_now(),
            root_hash,
            delta_url: delta.as_ref().map(|(name, _)| format!("/{name}")),
            delta_size: delta.as_ref().map(|(_, bytes)| bytes.len() as u64),
            delta_hash: delta.as_ref().map(|(_, bytes)| compute_sha256(bytes)),
            snapshot_url: format!("/{snapshot_name}"),
            snapshot_size: snapshot_bytes.len() as u64,
            snapshot_hash,
            min_client_version: PROTOCOL_VERSION,
            message: format!("Version {new_version} - {} fences", fences.len()),
            signature: Vec::new(),
            key_id: String::new(),
        };
        manifest.validate()?;
        manifest.sign(&self.key_pair)?;
        let manifest_bytes = manifest.to_canonical_json()?;

        // Stage artifacts: snapshot and delta must be durable before the
        // manifest that references them becomes observable.
        let snapshot_path = self.config.output_dir.join(&snapshot_name);
        write_atomic(&snapshot_path, &snapshot_bytes)?;

        let mut delta_path = None;
        let mut delta_size = None;
        if let Some((name, bytes)) = &delta {
            let path = self.config.output_dir.join(name);
            write_atomic(&path, bytes)?;
            delta_size = Some(bytes.len() as u64);
            delta_path = Some(path);
        }

        let manifest_path = self.config.output_dir.join("manifest.json");
        write_atomic(&manifest_path, &manifest_bytes)?;

        self.store.with_transaction(|tx| {
            tx.replace_all_fences(&fences)?;
            tx.set_manifest(&manifest)?;
            tx.set_version(new_version)?;
            tx.set_snapshot_bytes(&snapshot_bytes)?;
            Ok(())
        })?;
        self.current_version = new_version;

        tracing::info!(
            version = new_version,
            fences = fences.len(),
            snapshot = %snapshot_path.display(),
            delta = ?delta_path,
            "published"
        );

        Ok(PublishResult {
            version: new_version,
            previous_version,
            manifest_path,
            snapshot_path,
            delta_path,
            fences_count: fences.len(),
            snapshot_size: snapshot_bytes.len() as u64,
            delta_size,
        })
    }

    /// Returns the prior snapshot bytes from the authoring store, falling
    /// back to the previous-dir artifact for freshly seeded publishers.
    fn prior_snapshot_bytes(&self, previous_version: u64) -> Result<Option<Vec<u8>>, PublishError> {
        if previous_version == 0 {
            return Ok(None);
        }
        if let Some(bytes) = self.store.get_snapshot_bytes()? {
            return Ok(Some(bytes));
        }
        if let Some(previous_dir) = &self.config.previous_dir {
            let candidate = previous_dir.join(format!("v{previous_version}.bin"));
            match std::fs::read(&candidate) {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(err) => {
                    tracing::warn!(
                        path = %candidate.display(),
                        error = %err,
                        "previous snapshot unavailable; publishing without a delta"
                    );
                }
            }
        }
        Ok(None)
    }
}

// ============================================================================
// SECTION: Initialization
// ============================================================================

/// Resets the authoring store to version 0 with an empty fence set.
///
/// No manifest is emitted until the first publish.
///
/// # Errors
///
/// Returns [`PublishError`] on filesystem or store failure.
pub fn initialize(config: &PublisherConfig) -> Result<(), PublishError> {
    config.validate()?;
    let store_path = config.resolved_store_path();
    for suffix in ["", "-wal", "-shm"] {
        let mut name = store_path.as_os_str().to_os_string();
        name.push(suffix);
        let candidate = PathBuf::from(name);
        if candidate.exists() {
            std::fs::remove_file(&candidate)
                .map_err(|err| PublishError::Io(format!("remove {}: {err}", candidate.display())))?;
        }
    }

    std::fs::create_dir_all(&config.output_dir)
        .map_err(|err| PublishError::Io(format!("create output dir: {err}")))?;
    let store = SqliteStore::open(&StoreConfig::new(&store_path))?;
    store.set_version(0)?;
    Ok(())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Writes bytes to a temporary sibling and renames it into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PublishError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| PublishError::Io(format!("create {}: {err}", parent.display())))?;
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)
        .map_err(|err| PublishError::Io(format!("write {}: {err}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|err| PublishError::Io(format!("rename {}: {err}", path.display())))
}

/// Current Unix time in seconds.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
