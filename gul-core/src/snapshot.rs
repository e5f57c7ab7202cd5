// gul-core/src/snapshot.rs
// ============================================================================
// Module: GUL Snapshot Codec
// Description: Canonical on-wire form of a full fence collection.
// Purpose: Produce the single byte sequence that is hashed, diffed, and
//          committed to by the manifest.
// Dependencies: crate::fence, serde_jcs, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A snapshot is the RFC 8785 canonical JSON encoding of a
//! [`FenceCollection`] with its items sorted by identifier. The same bytes
//! serve three roles: they are hashed for the manifest's snapshot hash, the
//! per-item canonical forms feed the Merkle builder, and consecutive
//! snapshot byte sequences are what the delta codec diffs. Decoding then
//! re-encoding a snapshot yields identical bytes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::fence::FenceCollection;
use crate::fence::FenceError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the snapshot codec.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapshotError {
    /// Canonical encoding failed.
    #[error("snapshot encoding failed: {0}")]
    Encode(String),
    /// Snapshot bytes are not a valid collection.
    #[error("snapshot decoding failed: {0}")]
    Decode(String),
    /// A decoded item violates the fence invariants.
    #[error(transparent)]
    Fence(#[from] FenceError),
    /// Two items share an identifier.
    #[error("duplicate fence id in snapshot: {0}")]
    DuplicateId(String),
}

// ============================================================================
// SECTION: Codec
// ============================================================================

/// Encodes a collection into canonical snapshot bytes.
///
/// Items are sorted by identifier before encoding so the byte form is
/// independent of the caller's ordering.
///
/// # Errors
///
/// Returns [`SnapshotError::DuplicateId`] on repeated identifiers and
/// [`SnapshotError::Encode`] when canonical encoding fails.
pub fn encode_snapshot(collection: &FenceCollection) -> Result<Vec<u8>, SnapshotError> {
    let mut ordered = collection.clone();
    ordered.items.sort_by(|a, b| a.id.cmp(&b.id));
    for pair in ordered.items.windows(2) {
        if pair[0].id == pair[1].id {
            return Err(SnapshotError::DuplicateId(pair[0].id.clone()));
        }
    }
    serde_jcs::to_vec(&ordered).map_err(|err| SnapshotError::Encode(err.to_string()))
}

/// Decodes and validates snapshot bytes.
///
/// # Errors
///
/// Returns [`SnapshotError::Decode`] on malformed bytes, and the underlying
/// fence or duplicate-id error when an item is invalid.
pub fn decode_snapshot(bytes: &[u8]) -> Result<FenceCollection, SnapshotError> {
    let collection: FenceCollection =
        serde_json::from_slice(bytes).map_err(|err| SnapshotError::Decode(err.to_string()))?;
    let mut seen = std::collections::BTreeSet::new();
    for item in &collection.items {
        item.validate()?;
        if !seen.insert(item.id.as_str()) {
            return Err(SnapshotError::DuplicateId(item.id.clone()));
        }
    }
    Ok(collection)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::FenceItem;
    use crate::fence::FenceType;
    use crate::geometry::BoundingBox;
    use crate::geometry::Geometry;

    fn fence(id: &str) -> FenceItem {
        FenceItem {
            id: id.to_string(),
            fence_type: FenceType::SpeedLimit,
            geometry: Geometry::Bbox(BoundingBox {
                min_lat: 0.0,
                min_lon: 0.0,
                max_lat: 1.0,
                max_lon: 1.0,
            }),
            start_ts: 0,
            end_ts: 0,
            priority: 10,
            max_altitude_m: 0,
            max_speed_mps: 15,
            name: id.to_string(),
            description: String::new(),
            signature: Vec::new(),
            key_id: String::new(),
        }
    }

    #[test]
    fn encode_is_order_independent() {
        let forward = FenceCollection {
            items: vec![fence("a"), fence("b"), fence("c")],
            created_ts: 1_700_000_000,
            version: "3".to_string(),
        };
        let mut reversed = forward.clone();
        reversed.items.reverse();
        assert_eq!(
            encode_snapshot(&forward).expect("encode"),
            encode_snapshot(&reversed).expect("encode")
        );
    }

    #[test]
    fn decode_reencode_is_byte_identical() {
        let collection = FenceCollection {
            items: vec![fence("b"), fence("a")],
            created_ts: 1_700_000_000,
            version: "7".to_string(),
        };
        let bytes = encode_snapshot(&collection).expect("encode");
        let decoded = decode_snapshot(&bytes).expect("decode");
        let again = encode_snapshot(&decoded).expect("re-encode");
        assert_eq!(bytes, again);
    }

    #[test]
    fn empty_collection_roundtrips() {
        let empty = FenceCollection {
            items: Vec::new(),
            created_ts: 42,
            version: String::new(),
        };
        let bytes = encode_snapshot(&empty).expect("encode");
        let decoded = decode_snapshot(&bytes).expect("decode");
        assert!(decoded.items.is_empty());
        assert_eq!(decoded.created_ts, 42);
    }

    #[test]
    fn duplicate_ids_rejected_both_ways() {
        let duplicated = FenceCollection {
            items: vec![fence("a"), fence("a")],
            created_ts: 0,
            version: String::new(),
        };
        assert!(matches!(
            encode_snapshot(&duplicated),
            Err(SnapshotError::DuplicateId(_))
        ));
    }

    #[test]
    fn invalid_item_rejected_on_decode() {
        let mut bad = fence("a");
        bad.geometry = Geometry::Polygon {
            vertices: vec![],
        };
        let collection = FenceCollection {
            items: vec![bad],
            created_ts: 0,
            version: String::new(),
        };
        // Encode skips validation; decode must fail closed.
        let bytes = serde_jcs::to_vec(&collection).expect("raw encode");
        assert!(matches!(decode_snapshot(&bytes), Err(SnapshotError::Fence(_))));
    }

    #[test]
    fn garbage_bytes_rejected() {
        assert!(matches!(decode_snapshot(b"not json"), Err(SnapshotError::Decode(_))));
    }
}
