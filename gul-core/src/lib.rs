// gul-core/src/lib.rs
// ============================================================================
// Module: GUL Core Library
// Description: Public API surface for the GUL geofence distribution core.
// Purpose: Expose the fence data model, crypto primitives, and codecs.
// Dependencies: crate::{crypto, geometry, fence, merkle, delta, snapshot, manifest, setdelta}
// ============================================================================

//! ## Overview
//! GUL (Geofence Update Lite) distributes signed, versioned geofence datasets
//! as static artifacts for drones on low-bandwidth, intermittent links. This
//! crate holds the pieces that publisher and client must agree on byte for
//! byte: the fence data model and geometric predicates, Ed25519 signing, the
//! Merkle commitment over a fence set, the binary delta codec, and the
//! canonical snapshot and manifest encodings.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod crypto;
pub mod delta;
pub mod fence;
pub mod geometry;
pub mod manifest;
pub mod merkle;
pub mod setdelta;
pub mod snapshot;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crypto::CryptoError;
pub use crypto::Hash32;
pub use crypto::KeyPair;
pub use crypto::PublicKey;
pub use crypto::compute_sha256;
pub use crypto::hashes_equal;
pub use crypto::key_id_of;
pub use delta::DeltaError;
pub use delta::DeltaFrame;
pub use fence::CheckResult;
pub use fence::FenceCollection;
pub use fence::FenceError;
pub use fence::FenceItem;
pub use fence::FenceType;
pub use geometry::BoundingBox;
pub use geometry::Geometry;
pub use geometry::GeometryError;
pub use geometry::Point;
pub use manifest::Manifest;
pub use manifest::ManifestError;
pub use manifest::PROTOCOL_VERSION;
pub use merkle::MerkleError;
pub use merkle::MerkleTree;
pub use merkle::ProofSide;
pub use merkle::ProofStep;
pub use merkle::verify_fence_proof;
pub use merkle::verify_proof;
pub use setdelta::FenceSetDelta;
pub use setdelta::SetDeltaError;
pub use setdelta::apply_set_delta;
pub use setdelta::compute_set_delta;
pub use snapshot::SnapshotError;
pub use snapshot::decode_snapshot;
pub use snapshot::encode_snapshot;
