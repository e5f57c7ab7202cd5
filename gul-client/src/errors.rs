// gul-client/src/errors.rs
// ============================================================================
// Module: GUL Client Errors
// Description: Error kinds surfaced by the update protocol.
// Purpose: Give each sync failure a kind with a fixed retry policy.
// Dependencies: gul-core, gul-store-sqlite, thiserror
// ============================================================================

//! ## Overview
//! Only transport failures are retried, with capped exponential backoff.
//! Every other failure aborts the sync and leaves the local dataset
//! unchanged. A remote version below the local one is not an error at all:
//! it is logged and treated as up to date.

// ============================================================================
// SECTION: Imports
// ============================================================================

use gul_core::CryptoError;
use gul_core::DeltaError;
use gul_core::ManifestError;
use gul_core::SnapshotError;
use gul_store_sqlite::StoreError;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors surfaced by the client sync engine.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Misconfiguration; surfaced immediately, never retried.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Transport failure; the only kind retried automatically.
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    /// An artifact exceeded the configured download ceiling.
    #[error("artifact too large: {actual} bytes (max {max})")]
    TooLarge {
        /// Observed or advertised size in bytes.
        actual: u64,
        /// Configured ceiling in bytes.
        max: u64,
    },
    /// The caller cancelled the operation.
    #[error("cancelled")]
    Cancelled,
    /// Manifest signature missing or failed verification.
    #[error("manifest signature invalid: {0}")]
    SignatureInvalid(String),
    /// Manifest advertises a different signing key than configured.
    #[error("key id mismatch: expected {expected}, found {found}")]
    KeyIdMismatch {
        /// Key id derived from the configured public key.
        expected: String,
        /// Key id advertised by the manifest.
        found: String,
    },
    /// Artifact bytes do not match the hash the manifest advertised.
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),
    /// The manifest demands a newer client protocol version.
    #[error("client too old: manifest requires protocol {required}, this client speaks {supported}")]
    ClientTooOld {
        /// Minimum protocol version the manifest demands.
        required: u32,
        /// Protocol version this implementation speaks.
        supported: u32,
    },
    /// Manifest decoding or validation failure.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// Snapshot decoding or validation failure.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// Delta frame or application failure.
    #[error(transparent)]
    Delta(#[from] DeltaError),
    /// Local store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Key material failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl SyncError {
    /// Returns whether automatic retry is permitted for this kind.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
