// gul-client/src/syncer.rs
// ============================================================================
// Module: GUL Sync Engine
// Description: The client update protocol: verify, choose, apply, commit.
// Purpose: Advance the local dataset only through successful, verified
//          updates; never move backward, never leave partial state.
// Dependencies: gul-core, gul-store-sqlite, tokio, tracing
// ============================================================================

//! ## Overview
//! A sync fetches the signed manifest, verifies the signature and key
//! identity, compares versions, and picks the cheapest safe path: a delta
//! when the remote is exactly one version ahead and a delta artifact exists,
//! a full snapshot otherwise. Artifacts are hash-verified, the decoded fence
//! set is re-committed against the manifest's Merkle root, and the whole
//! apply happens in one store transaction. A delta that fails verification
//! poisons the delta path for that manifest version so the next attempt
//! downgrades to the snapshot. A remote version at or below the local one is
//! up to date; a lower one is a rollback attempt, logged and ignored.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use gul_core::CheckResult;
use gul_core::DeltaError;
use gul_core::FenceCollection;
use gul_core::Manifest;
use gul_core::MerkleTree;
use gul_core::PROTOCOL_VERSION;
use gul_core::PublicKey;
use gul_core::compute_set_delta;
use gul_core::compute_sha256;
use gul_core::decode_snapshot;
use gul_core::delta;
use gul_store_sqlite::SqliteStore;
use gul_store_sqlite::StoreConfig;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::ClientConfig;
use crate::errors::SyncError;
use crate::http::HttpFetcher;
use crate::http::cancelled;
use crate::query;

// ============================================================================
// SECTION: Results
// ============================================================================

/// Outcome of one sync pass.
pub type SyncOutcome = Result<SyncReport, SyncError>;

/// Statistics from a completed sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Whether the local dataset was already current.
    pub up_to_date: bool,
    /// Local version before the pass.
    pub previous_version: u64,
    /// Local version after the pass.
    pub version: u64,
    /// Fences added by this pass.
    pub fences_added: usize,
    /// Fences removed by this pass.
    pub fences_removed: usize,
    /// Fences updated by this pass.
    pub fences_updated: usize,
    /// Artifact bytes downloaded.
    pub bytes_downloaded: u64,
    /// Wall-clock duration of the pass.
    pub duration: Duration,
}

impl SyncReport {
    /// Builds the up-to-date report for an unchanged dataset.
    fn up_to_date(version: u64, duration: Duration) -> Self {
        Self {
            up_to_date: true,
            previous_version: version,
            version,
            fences_added: 0,
            fences_removed: 0,
            fences_updated: 0,
            bytes_downloaded: 0,
            duration,
        }
    }
}

// ============================================================================
// SECTION: Sync State
// ============================================================================

/// Observable phase of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync pass in progress.
    Idle,
    /// Fetching and verifying the remote manifest.
    Checking,
    /// Local dataset already matches the remote version.
    UpToDate,
    /// A newer version exists; choosing an update path.
    Updating,
    /// Fetching and applying the delta artifact.
    ApplyingDelta,
    /// Fetching and applying the snapshot artifact.
    ApplyingSnapshot,
    /// Writing the new dataset, manifest, and version transactionally.
    CommittingVersion,
    /// The last pass failed; local state is unchanged.
    Failed,
}

// ============================================================================
// SECTION: Shutdown
// ============================================================================

/// Cancellation handle shared with auto-sync tasks and callers.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Signals cancellation to every in-flight fetch and backoff wait.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

// ============================================================================
// SECTION: Syncer
// ============================================================================

/// The client sync engine: one writer over the local store.
pub struct Syncer {
    config: ClientConfig,
    fetcher: HttpFetcher,
    store: SqliteStore,
    public_key: Option<PublicKey>,
    local_version: u64,
    /// Manifest version whose delta artifact failed verification; forces
    /// the snapshot path for that version on the next attempt.
    poisoned_delta: Option<u64>,
    last_check: Option<i64>,
    last_sync: Option<i64>,
    shutdown: Arc<watch::Sender<bool>>,
    /// Optional download progress callback for artifact fetches.
    progress: Option<Arc<dyn Fn(u64, Option<u64>) + Send + Sync>>,
    /// Phase of the current or most recent sync pass.
    state: SyncState,
}

impl Syncer {
    /// Opens a syncer over the configured store and manifest URL.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] on configuration problems and
    /// [`SyncError::Store`] when the store cannot be opened.
    pub fn open(config: ClientConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let fetcher = HttpFetcher::new(&config)?;
        let public_key = config.public_key()?;
        let store = SqliteStore::open(&StoreConfig::new(&config.store_path))?;
        let local_version = store.get_version()?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            fetcher,
            store,
            public_key,
            local_version,
            poisoned_delta: None,
            last_check: None,
            last_sync: None,
            shutdown: Arc::new(shutdown),
            progress: None,
            state: SyncState::Idle,
        })
    }

    /// Phase of the current or most recent sync pass.
    #[must_use]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    /// Installs a progress callback invoked during artifact downloads with
    /// the bytes received so far and the total when known. Callbacks may
    /// fire at arbitrary frequency.
    pub fn set_progress_callback(
        &mut self,
        callback: impl Fn(u64, Option<u64>) + Send + Sync + 'static,
    ) {
        self.progress = Some(Arc::new(callback));
    }

    /// Returns a read capability on the local store.
    #[must_use]
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Current local dataset version.
    #[must_use]
    pub const fn local_version(&self) -> u64 {
        self.local_version
    }

    /// Unix second of the last manifest check, if any.
    #[must_use]
    pub const fn last_check_at(&self) -> Option<i64> {
        self.last_check
    }

    /// Unix second of the last successful sync, if any.
    #[must_use]
    pub const fn last_sync_at(&self) -> Option<i64> {
        self.last_sync
    }

    /// Returns a cancellation handle for this syncer.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    /// Checks whether flight is allowed at a position and instant.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] on query failure.
    pub fn check(&self, lat: f64, lon: f64, t: i64) -> Result<CheckResult, SyncError> {
        query::check_at(&self.store, lat, lon, t)
    }

    /// Fetches and verifies the remote manifest without applying anything.
    ///
    /// # Errors
    ///
    /// Returns the same error kinds as the fetch-and-verify phase of
    /// [`Syncer::sync`].
    pub async fn check_for_updates(&mut self) -> Result<Manifest, SyncError> {
        self.last_check = Some(unix_now());
        let mut cancel = self.shutdown.subscribe();
        let manifest =
            self.fetcher.fetch_manifest_with_retry(self.config.max_retries, &mut cancel).await?;
        self.verify_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Runs one full sync pass.
    ///
    /// On success the local version equals the remote version; on any
    /// failure the local version and fence set are exactly as before.
    ///
    /// # Errors
    ///
    /// Returns the error kind of the first failing step; only transport
    /// failures were retried internally.
    pub async fn sync(&mut self) -> SyncOutcome {
        self.state = SyncState::Checking;
        let outcome = self.sync_pass().await;
        self.state = match &outcome {
            Ok(report) if report.up_to_date => SyncState::UpToDate,
            Ok(_) => SyncState::Idle,
            Err(_) => SyncState::Failed,
        };
        outcome
    }

    /// The body of one sync pass; state bookkeeping lives in [`Syncer::sync`].
    async fn sync_pass(&mut self) -> SyncOutcome {
        let started = Instant::now();
        let previous = self.local_version;
        let mut cancel = self.shutdown.subscribe();

        self.last_check = Some(unix_now());
        let manifest =
            self.fetcher.fetch_manifest_with_retry(self.config.max_retries, &mut cancel).await?;
        self.verify_manifest(&manifest)?;

        // Version compare runs before the protocol gate: a client that is
        // already current stays UpToDate even when the manifest demands a
        // newer protocol; only an actual update it cannot speak is an error.
        if manifest.version <= previous {
            if manifest.version < previous {
                tracing::warn!(
                    remote = manifest.version,
                    local = previous,
                    "rollback attempt: remote version is behind local; ignoring"
                );
            }
            return Ok(SyncReport::up_to_date(previous, started.elapsed()));
        }

        if manifest.min_client_version > PROTOCOL_VERSION {
            return Err(SyncError::ClientTooOld {
                required: manifest.min_client_version,
                supported: PROTOCOL_VERSION,
            });
        }

        tracing::info!(from = previous, to = manifest.version, "new version available");

        let old_fences = self.store.list_fences()?;
        let old_snapshot = self.store.get_snapshot_bytes()?;

        self.state = SyncState::Updating;
        let use_delta = manifest.version == previous + 1
            && manifest.delta_url.is_some()
            && self.poisoned_delta != Some(manifest.version)
            && old_snapshot.is_some();

        let (collection, snapshot_bytes, downloaded) = if use_delta {
            self.state = SyncState::ApplyingDelta;
            let old_snapshot = old_snapshot.unwrap_or_default();
            match self.fetch_via_delta(&manifest, &old_snapshot, previous, &mut cancel).await {
                Ok(applied) => applied,
                Err(err) => {
                    if delta_poisons(&err) {
                        tracing::warn!(
                            version = manifest.version,
                            error = %err,
                            "delta path failed verification; next attempt will use the snapshot"
                        );
                        self.poisoned_delta = Some(manifest.version);
                    }
                    return Err(err);
                }
            }
        } else {
            self.state = SyncState::ApplyingSnapshot;
            self.fetch_via_snapshot(&manifest, &mut cancel).await?
        };

        // The Merkle root in the signed manifest binds the entire dataset.
        let tree = MerkleTree::build(&collection.items)
            .map_err(|err| SyncError::IntegrityFailure(err.to_string()))?;
        if !tree.root().ct_eq(&manifest.root_hash) {
            if use_delta {
                self.poisoned_delta = Some(manifest.version);
            }
            return Err(SyncError::IntegrityFailure(
                "dataset root does not match signed manifest".to_string(),
            ));
        }

        self.state = SyncState::CommittingVersion;
        self.store.with_transaction(|tx| {
            tx.replace_all_fences(&collection.items)?;
            tx.set_manifest(&manifest)?;
            tx.set_version(manifest.version)?;
            tx.set_snapshot_bytes(&snapshot_bytes)?;
            Ok(())
        })?;

        self.local_version = manifest.version;
        self.poisoned_delta = None;
        self.last_sync = Some(unix_now());

        let changes = compute_set_delta(&old_fences, &collection.items);
        let report = SyncReport {
            up_to_date: false,
            previous_version: previous,
            version: manifest.version,
            fences_added: changes.added.len(),
            fences_removed: changes.removed_ids.len(),
            fences_updated: changes.updated.len(),
            bytes_downloaded: downloaded,
            duration: started.elapsed(),
        };
        tracing::info!(
            version = report.version,
            added = report.fences_added,
            removed = report.fences_removed,
            updated = report.fences_updated,
            "sync complete"
        );
        Ok(report)
    }

    /// Verifies manifest signature and key identity.
    fn verify_manifest(&self, manifest: &Manifest) -> Result<(), SyncError> {
        let Some(public_key) = &self.public_key else {
            if self.config.insecure_skip_verify {
                tracing::warn!("accepting manifest WITHOUT signature verification");
                return Ok(());
            }
            return Err(SyncError::InvalidConfig(
                "no public key configured and verification not explicitly disabled".to_string(),
            ));
        };

        if manifest.signature.is_empty() {
            return Err(SyncError::SignatureInvalid("manifest has no signature".to_string()));
        }
        let expected = public_key.key_id();
        if manifest.key_id != expected {
            return Err(SyncError::KeyIdMismatch {
                expected,
                found: manifest.key_id.clone(),
            });
        }
        if !manifest.verify(public_key) {
            return Err(SyncError::SignatureInvalid(
                "signature verification failed".to_string(),
            ));
        }
        Ok(())
    }

    /// Fetches the delta artifact and reconstructs the new snapshot bytes.
    async fn fetch_via_delta(
        &self,
        manifest: &Manifest,
        old_snapshot: &[u8],
        previous: u64,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(FenceCollection, Vec<u8>, u64), SyncError> {
        let url = manifest.delta_url.as_deref().unwrap_or_default();
        tracing::debug!(url, "applying delta update");
        let progress = self.progress.as_deref();
        let artifact = self.fetcher.fetch_artifact(url, progress, cancel).await?;

        if let Some(expected) = &manifest.delta_hash {
            if !compute_sha256(&artifact).ct_eq(expected) {
                return Err(SyncError::IntegrityFailure(
                    "delta artifact hash does not match manifest".to_string(),
                ));
            }
        }

        let frame = gul_core::DeltaFrame::decode(&artifact, manifest.version)?;
        if frame.from_version != previous {
            return Err(SyncError::Delta(DeltaError::VersionMismatch {
                expected: previous,
                found: frame.from_version,
            }));
        }

        let new_bytes = delta::apply(old_snapshot, &frame.payload, delta::DEFAULT_MAX_EXPANSION)?;
        if !compute_sha256(&new_bytes).ct_eq(&manifest.snapshot_hash) {
            return Err(SyncError::IntegrityFailure(
                "reconstructed snapshot does not match manifest hash".to_string(),
            ));
        }

        let collection = decode_snapshot(&new_bytes)?;
        Ok((collection, new_bytes, artifact.len() as u64))
    }

    /// Fetches and verifies the full snapshot artifact.
    async fn fetch_via_snapshot(
        &self,
        manifest: &Manifest,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(FenceCollection, Vec<u8>, u64), SyncError> {
        tracing::debug!(url = %manifest.snapshot_url, "applying snapshot update");
        let progress = self.progress.as_deref();
        let artifact =
            self.fetcher.fetch_artifact(&manifest.snapshot_url, progress, cancel).await?;

        if !compute_sha256(&artifact).ct_eq(&manifest.snapshot_hash) {
            return Err(SyncError::IntegrityFailure(
                "snapshot artifact hash does not match manifest".to_string(),
            ));
        }

        let collection = decode_snapshot(&artifact)?;
        let downloaded = artifact.len() as u64;
        Ok((collection, artifact, downloaded))
    }

    /// Starts the cooperative periodic sync task.
    ///
    /// Results land on a single-slot channel; a slow consumer only ever
    /// observes the latest outcome. Cancellation through the returned
    /// handle aborts in-flight fetches and stops the task.
    #[must_use]
    pub fn start_auto_sync(self) -> AutoSync {
        let (results_tx, results_rx) = watch::channel(None);
        let shutdown = self.shutdown_handle();
        let mut cancel = self.shutdown.subscribe();
        let period = self.config.sync_interval();

        let task = tokio::spawn(async move {
            let mut syncer = self;

            let outcome = syncer.sync().await;
            let stop = matches!(outcome, Err(SyncError::Cancelled));
            let _ = results_tx.send(Some(outcome));
            if stop {
                return syncer;
            }

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of an interval fires immediately; the initial
            // sync already happened, so consume it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancelled(&mut cancel) => break,
                    _ = ticker.tick() => {
                        let outcome = syncer.sync().await;
                        let stop = matches!(outcome, Err(SyncError::Cancelled));
                        let _ = results_tx.send(Some(outcome));
                        if stop {
                            break;
                        }
                    }
                }
            }
            syncer
        });

        AutoSync {
            results: results_rx,
            shutdown,
            task,
        }
    }
}

// ============================================================================
// SECTION: Auto-Sync Handle
// ============================================================================

/// Handle over a running auto-sync task.
pub struct AutoSync {
    results: watch::Receiver<Option<SyncOutcome>>,
    shutdown: ShutdownHandle,
    task: tokio::task::JoinHandle<Syncer>,
}

impl AutoSync {
    /// Subscribes to sync outcomes; the channel holds only the latest.
    #[must_use]
    pub fn results(&self) -> watch::Receiver<Option<SyncOutcome>> {
        self.results.clone()
    }

    /// Returns the cancellation handle for the task.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Cancels the task and returns the syncer once it has stopped.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if the task panicked or was aborted.
    pub async fn stop(self) -> Result<Syncer, SyncError> {
        self.shutdown.shutdown();
        self.task.await.map_err(|_| SyncError::Cancelled)
    }
}

/// Current Unix time in seconds.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Returns whether a delta-path failure should force the snapshot path on
/// the next attempt at the same manifest version.
fn delta_poisons(err: &SyncError) -> bool {
    matches!(
        err,
        SyncError::IntegrityFailure(_)
            | SyncError::Delta(_)
            | SyncError::Snapshot(_)
    )
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use gul_core::Hash32;
    use gul_core::KeyPair;

    fn signed_manifest(pair: &KeyPair, version: u64) -> Manifest {
        let mut manifest = Manifest {
            version,
            timestamp: 1_700_000_000,
            root_hash: Hash32::ZERO,
            delta_url: None,
            delta_size: None,
            delta_hash: None,
            snapshot_url: format!("/v{version}.bin"),
            snapshot_size: 2,
            snapshot_hash: compute_sha256(b"{}"),
            min_client_version: 1,
            message: String::new(),
            signature: Vec::new(),
            key_id: String::new(),
        };
        manifest.sign(pair).expect("sign");
        manifest
    }

    fn syncer_with_key(pair: &KeyPair) -> (tempfile::TempDir, Syncer) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ClientConfig::new(
            "https://cdn.example.com/geofence/manifest.json",
            dir.path().join("fences.db"),
        );
        config.public_key_hex = pair.public_key().to_hex();
        let syncer = Syncer::open(config).expect("open");
        (dir, syncer)
    }

    #[test]
    fn verify_accepts_correctly_signed_manifest() {
        let pair = KeyPair::generate().expect("keypair");
        let (_dir, syncer) = syncer_with_key(&pair);
        let manifest = signed_manifest(&pair, 3);
        syncer.verify_manifest(&manifest).expect("verified");
    }

    #[test]
    fn verify_rejects_missing_signature() {
        let pair = KeyPair::generate().expect("keypair");
        let (_dir, syncer) = syncer_with_key(&pair);
        let mut manifest = signed_manifest(&pair, 3);
        manifest.signature.clear();
        assert!(matches!(
            syncer.verify_manifest(&manifest),
            Err(SyncError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn verify_rejects_tampered_manifest() {
        let pair = KeyPair::generate().expect("keypair");
        let (_dir, syncer) = syncer_with_key(&pair);
        let mut manifest = signed_manifest(&pair, 3);
        manifest.version = 4;
        assert!(matches!(
            syncer.verify_manifest(&manifest),
            Err(SyncError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn verify_rejects_foreign_key_id() {
        let pair = KeyPair::generate().expect("keypair");
        let other = KeyPair::generate().expect("keypair");
        let (_dir, syncer) = syncer_with_key(&pair);
        let manifest = signed_manifest(&other, 3);
        assert!(matches!(
            syncer.verify_manifest(&manifest),
            Err(SyncError::KeyIdMismatch { .. })
        ));
    }

    #[test]
    fn verify_without_key_requires_explicit_opt_out() {
        let pair = KeyPair::generate().expect("keypair");
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ClientConfig::new(
            "https://cdn.example.com/geofence/manifest.json",
            dir.path().join("fences.db"),
        );
        config.insecure_skip_verify = true;
        let syncer = Syncer::open(config).expect("open");

        // With verification disabled, even an unsigned manifest passes.
        let mut manifest = signed_manifest(&pair, 3);
        manifest.signature.clear();
        syncer.verify_manifest(&manifest).expect("explicitly unverified");
    }

    #[test]
    fn fresh_store_starts_at_version_zero() {
        let pair = KeyPair::generate().expect("keypair");
        let (_dir, syncer) = syncer_with_key(&pair);
        assert_eq!(syncer.local_version(), 0);
        assert!(syncer.last_check_at().is_none());
        assert!(syncer.last_sync_at().is_none());
    }
}
