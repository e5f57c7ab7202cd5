// gul-core/src/manifest.rs
// ============================================================================
// Module: GUL Manifest
// Description: The signed index naming the current version and its artifacts.
// Purpose: Separate the signed canonical bytes from the signature and bind
//          the dataset root, artifact hashes, and version routing.
// Dependencies: crate::{crypto, fence}, serde, serde_jcs, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The manifest is the small signed object clients poll. Its signature
//! covers the RFC 8785 canonical JSON of the manifest with the signature
//! field cleared and the key id retained; keeping the signed byte
//! definition explicit avoids signing a non-canonical form. Versions are
//! monotonically increasing; values above 2^63 are rejected outright so
//! version arithmetic can never overflow signed storage.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::crypto::Hash32;
use crate::crypto::KeyPair;
use crate::crypto::PublicKey;
use crate::fence::hex_bytes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Protocol version advertised by this implementation.
///
/// Manifests whose `min_client_version` exceeds this value cannot be
/// applied by this client.
pub const PROTOCOL_VERSION: u32 = 1;

/// Highest accepted manifest version; larger values are rejected.
pub const MAX_MANIFEST_VERSION: u64 = 1 << 63;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by manifest validation and encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    /// Structural invariant violation.
    #[error("invalid manifest: {0}")]
    Invalid(String),
    /// Canonical encoding failed.
    #[error("manifest encoding failed: {0}")]
    Encoding(String),
    /// Manifest bytes are not valid JSON for this schema.
    #[error("manifest decoding failed: {0}")]
    Decoding(String),
}

// ============================================================================
// SECTION: Manifest
// ============================================================================

/// The signed index of a published dataset version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Monotonically increasing dataset version.
    pub version: u64,
    /// Publish time, Unix seconds. Informational only.
    pub timestamp: i64,
    /// Merkle root over the fence set.
    pub root_hash: Hash32,
    /// Delta artifact location, when one exists for this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_url: Option<String>,
    /// Byte length of the delta artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_size: Option<u64>,
    /// SHA-256 of the delta artifact bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_hash: Option<Hash32>,
    /// Snapshot artifact location.
    pub snapshot_url: String,
    /// Byte length of the snapshot artifact.
    pub snapshot_size: u64,
    /// SHA-256 of the snapshot artifact bytes.
    pub snapshot_hash: Hash32,
    /// Minimum protocol version a client must speak to apply this manifest.
    pub min_client_version: u32,
    /// Human-readable release message.
    pub message: String,
    /// Ed25519 signature over the pre-signature canonical bytes.
    #[serde(with = "hex_bytes", default, skip_serializing_if = "Vec::is_empty")]
    pub signature: Vec<u8>,
    /// Identifier of the signing key.
    pub key_id: String,
}

impl Manifest {
    /// Validates the manifest invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Invalid`] on a zero or overflowing version,
    /// an empty snapshot location, or a delta location without size/hash.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.version == 0 {
            return Err(ManifestError::Invalid("version must be positive".to_string()));
        }
        if self.version > MAX_MANIFEST_VERSION {
            return Err(ManifestError::Invalid(format!(
                "version {} overflows the accepted range",
                self.version
            )));
        }
        if self.snapshot_url.is_empty() {
            return Err(ManifestError::Invalid("snapshot url must be non-empty".to_string()));
        }
        if self.delta_url.is_some() && (self.delta_size.is_none() || self.delta_hash.is_none()) {
            return Err(ManifestError::Invalid(
                "delta url requires delta size and hash".to_string(),
            ));
        }
        Ok(())
    }

    /// Canonical pre-signature bytes: the manifest with signature cleared,
    /// key id retained.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Encoding`] when canonical encoding fails.
    pub fn presign_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        let mut copy = self.clone();
        copy.signature.clear();
        serde_jcs::to_vec(&copy).map_err(|err| ManifestError::Encoding(err.to_string()))
    }

    /// Signs the manifest in place, populating signature and key id.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Encoding`] when canonical encoding fails.
    pub fn sign(&mut self, key_pair: &KeyPair) -> Result<(), ManifestError> {
        self.key_id = key_pair.key_id();
        let bytes = self.presign_bytes()?;
        self.signature = key_pair.sign(&bytes).to_vec();
        Ok(())
    }

    /// Verifies the manifest signature against the publisher key.
    #[must_use]
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        if self.signature.is_empty() {
            return false;
        }
        let Ok(bytes) = self.presign_bytes() else {
            return false;
        };
        public_key.verify(&bytes, &self.signature)
    }

    /// Encodes the manifest to its on-wire canonical JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Encoding`] when encoding fails.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, ManifestError> {
        serde_jcs::to_vec(self).map_err(|err| ManifestError::Encoding(err.to_string()))
    }

    /// Decodes a manifest from JSON bytes and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Decoding`] on malformed bytes and
    /// [`ManifestError::Invalid`] on invariant violations.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Self =
            serde_json::from_slice(bytes).map_err(|err| ManifestError::Decoding(err.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::compute_sha256;

    fn sample_manifest() -> Manifest {
        Manifest {
            version: 3,
            timestamp: 1_700_000_000,
            root_hash: compute_sha256(b"root"),
            delta_url: Some("/patches/v2_to_v3.bin".to_string()),
            delta_size: Some(512),
            delta_hash: Some(compute_sha256(b"delta")),
            snapshot_url: "/v3.bin".to_string(),
            snapshot_size: 4_096,
            snapshot_hash: compute_sha256(b"snapshot"),
            min_client_version: 1,
            message: "Version 3 - 12 fences".to_string(),
            signature: Vec::new(),
            key_id: String::new(),
        }
    }

    #[test]
    fn sign_verify_roundtrip() {
        let pair = KeyPair::generate().expect("keypair");
        let mut manifest = sample_manifest();
        manifest.sign(&pair).expect("sign");

        assert_eq!(manifest.key_id, pair.key_id());
        assert!(manifest.verify(&pair.public_key()));
    }

    #[test]
    fn flipping_any_field_breaks_verification() {
        let pair = KeyPair::generate().expect("keypair");
        let mut manifest = sample_manifest();
        manifest.sign(&pair).expect("sign");
        let key = pair.public_key();

        let mut tampered = manifest.clone();
        tampered.version += 1;
        assert!(!tampered.verify(&key));

        let mut tampered = manifest.clone();
        tampered.root_hash = compute_sha256(b"other root");
        assert!(!tampered.verify(&key));

        let mut tampered = manifest.clone();
        tampered.message.push('!');
        assert!(!tampered.verify(&key));

        let mut tampered = manifest.clone();
        tampered.key_id = "0000000000000000".repeat(2);
        assert!(!tampered.verify(&key));
    }

    #[test]
    fn unsigned_manifest_does_not_verify() {
        let pair = KeyPair::generate().expect("keypair");
        let manifest = sample_manifest();
        assert!(!manifest.verify(&pair.public_key()));
    }

    #[test]
    fn canonical_json_roundtrip_survives_signature() {
        let pair = KeyPair::generate().expect("keypair");
        let mut manifest = sample_manifest();
        manifest.sign(&pair).expect("sign");

        let bytes = manifest.to_canonical_json().expect("encode");
        let decoded = Manifest::from_json(&bytes).expect("decode");
        assert_eq!(decoded, manifest);
        assert!(decoded.verify(&pair.public_key()));
    }

    #[test]
    fn version_overflow_rejected() {
        let mut manifest = sample_manifest();
        manifest.version = MAX_MANIFEST_VERSION + 1;
        assert!(matches!(manifest.validate(), Err(ManifestError::Invalid(_))));

        manifest.version = MAX_MANIFEST_VERSION;
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn delta_fields_travel_together() {
        let mut manifest = sample_manifest();
        manifest.delta_size = None;
        assert!(matches!(manifest.validate(), Err(ManifestError::Invalid(_))));

        manifest.delta_url = None;
        manifest.delta_hash = None;
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn zero_version_rejected() {
        let mut manifest = sample_manifest();
        manifest.version = 0;
        assert!(matches!(manifest.validate(), Err(ManifestError::Invalid(_))));
    }
}
