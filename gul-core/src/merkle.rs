// gul-core/src/merkle.rs
// ============================================================================
// Module: GUL Merkle Commitment
// Description: Deterministic Merkle tree and inclusion proofs over fences.
// Purpose: Bind an entire fence set to a single 32-byte root carried in the
//          signed manifest.
// Dependencies: crate::{crypto, fence}, sha2, thiserror
// ============================================================================

//! ## Overview
//! Leaves are ordered by ascending fence identifier regardless of input
//! order, so publisher and clients arrive at byte-identical roots. Leaf
//! preimages are the canonical item bytes with the signature cleared.
//! Internal nodes hash left ‖ right; when a level has odd arity the last
//! node is carried unmodified to the next level. Proof steps carry an
//! explicit side tag; without it, hash composition order would be
//! ambiguous. The empty set commits to the all-zero root.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::crypto::Hash32;
use crate::crypto::compute_sha256;
use crate::fence::FenceError;
use crate::fence::FenceItem;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when building trees or constructing proofs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    /// No leaf exists for the requested fence identifier.
    #[error("fence not found: {0}")]
    FenceNotFound(String),
    /// A leaf preimage could not be canonically encoded.
    #[error("leaf encoding failed: {0}")]
    Encoding(String),
    /// The same fence identifier appears more than once.
    #[error("duplicate fence id: {0}")]
    DuplicateId(String),
}

impl From<FenceError> for MerkleError {
    fn from(error: FenceError) -> Self {
        Self::Encoding(error.to_string())
    }
}

// ============================================================================
// SECTION: Proofs
// ============================================================================

/// Which side of the running hash the sibling occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofSide {
    /// Sibling is hashed before the running hash.
    Left,
    /// Sibling is hashed after the running hash.
    Right,
}

/// One step of an inclusion proof, leaf to root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofStep {
    /// Sibling hash at this level.
    pub hash: Hash32,
    /// Side on which the sibling is composed.
    pub side: ProofSide,
}

// ============================================================================
// SECTION: Tree
// ============================================================================

/// A Merkle tree over a fence set.
///
/// Levels are stored bottom-up so proof construction walks the index
/// mapping `i -> i / 2` per level instead of searching for parents.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// Hash levels, `levels[0]` being the leaves.
    levels: Vec<Vec<Hash32>>,
    /// Sorted leaf identifiers aligned with `levels[0]`.
    leaf_index: BTreeMap<String, usize>,
}

impl MerkleTree {
    /// Builds the tree over the given fences.
    ///
    /// Input order is irrelevant; leaves are sorted by fence identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MerkleError::DuplicateId`] on repeated identifiers and
    /// [`MerkleError::Encoding`] when a leaf preimage cannot be encoded.
    pub fn build(fences: &[FenceItem]) -> Result<Self, MerkleError> {
        let mut sorted: Vec<&FenceItem> = fences.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut leaf_index = BTreeMap::new();
        let mut leaves = Vec::with_capacity(sorted.len());
        for (position, fence) in sorted.iter().enumerate() {
            if leaf_index.insert(fence.id.clone(), position).is_some() {
                return Err(MerkleError::DuplicateId(fence.id.clone()));
            }
            leaves.push(compute_sha256(&fence.leaf_bytes()?));
        }

        let mut levels = vec![leaves];
        while levels.last().map_or(0, Vec::len) > 1 {
            let current = levels.last().expect("at least one level");
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                match pair {
                    [left, right] => next.push(hash_pair(left, right)),
                    // Odd arity: carry the last node up unmodified.
                    [single] => next.push(*single),
                    _ => unreachable!("chunks(2) yields 1 or 2 elements"),
                }
            }
            levels.push(next);
        }

        Ok(Self { levels, leaf_index })
    }

    /// Returns the root commitment; the all-zero hash for an empty set.
    #[must_use]
    pub fn root(&self) -> Hash32 {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or(Hash32::ZERO)
    }

    /// Number of leaves in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Returns whether the tree has no leaves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds the inclusion proof for a fence identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MerkleError::FenceNotFound`] for unknown identifiers.
    pub fn proof(&self, fence_id: &str) -> Result<Vec<ProofStep>, MerkleError> {
        let mut index = *self
            .leaf_index
            .get(fence_id)
            .ok_or_else(|| MerkleError::FenceNotFound(fence_id.to_string()))?;

        let mut steps = Vec::new();
        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            let sibling = index ^ 1;
            if sibling < level.len() {
                let side = if index % 2 == 0 { ProofSide::Right } else { ProofSide::Left };
                steps.push(ProofStep {
                    hash: level[sibling],
                    side,
                });
            }
            // Carried odd nodes emit no step at this level.
            index /= 2;
        }
        Ok(steps)
    }
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies an inclusion proof for canonical leaf bytes against a root.
#[must_use]
pub fn verify_proof(leaf_bytes: &[u8], proof: &[ProofStep], root: &Hash32) -> bool {
    let mut current = compute_sha256(leaf_bytes);
    for step in proof {
        current = match step.side {
            ProofSide::Left => hash_pair(&step.hash, &current),
            ProofSide::Right => hash_pair(&current, &step.hash),
        };
    }
    current.ct_eq(root)
}

/// Verifies an inclusion proof for a fence item against a root.
///
/// # Errors
///
/// Returns [`MerkleError::Encoding`] when the leaf preimage cannot be
/// encoded; verification failure itself is the `Ok(false)` outcome.
pub fn verify_fence_proof(
    fence: &FenceItem,
    proof: &[ProofStep],
    root: &Hash32,
) -> Result<bool, MerkleError> {
    Ok(verify_proof(&fence.leaf_bytes()?, proof, root))
}

/// Hashes a left/right node pair into its parent.
fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash32(hasher.finalize().into())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::FenceType;
    use crate::geometry::BoundingBox;
    use crate::geometry::Geometry;

    fn fence(id: &str, priority: u32) -> FenceItem {
        FenceItem {
            id: id.to_string(),
            fence_type: FenceType::TempRestriction,
            geometry: Geometry::Bbox(BoundingBox {
                min_lat: 0.0,
                min_lon: 0.0,
                max_lat: 1.0,
                max_lon: 1.0,
            }),
            start_ts: 0,
            end_ts: 0,
            priority,
            max_altitude_m: 0,
            max_speed_mps: 0,
            name: id.to_string(),
            description: String::new(),
            signature: Vec::new(),
            key_id: String::new(),
        }
    }

    fn fences(ids: &[&str]) -> Vec<FenceItem> {
        ids.iter().enumerate().map(|(i, id)| fence(id, i as u32)).collect()
    }

    #[test]
    fn empty_set_has_zero_root() {
        let tree = MerkleTree::build(&[]).expect("build");
        assert_eq!(tree.root(), Hash32::ZERO);
        assert!(tree.is_empty());
        assert!(matches!(tree.proof("a"), Err(MerkleError::FenceNotFound(_))));
    }

    #[test]
    fn root_is_independent_of_input_order() {
        let forward = MerkleTree::build(&fences(&["a", "b", "c", "d", "e"])).expect("build");
        let reversed = MerkleTree::build(&fences(&["e", "d", "c", "b", "a"])).expect("build");
        let shuffled = MerkleTree::build(&fences(&["c", "a", "e", "b", "d"])).expect("build");
        assert_eq!(forward.root(), reversed.root());
        assert_eq!(forward.root(), shuffled.root());
    }

    #[test]
    fn root_changes_with_content() {
        let base = MerkleTree::build(&fences(&["a", "b"])).expect("build");
        let mut changed = fences(&["a", "b"]);
        changed[1].priority = 999;
        let other = MerkleTree::build(&changed).expect("build");
        assert_ne!(base.root(), other.root());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let items = fences(&["a", "a"]);
        assert!(matches!(MerkleTree::build(&items), Err(MerkleError::DuplicateId(_))));
    }

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let items = fences(&["only"]);
        let tree = MerkleTree::build(&items).expect("build");
        let leaf = compute_sha256(&items[0].leaf_bytes().expect("leaf"));
        assert_eq!(tree.root(), leaf);
        assert!(tree.proof("only").expect("proof").is_empty());
    }

    #[test]
    fn proofs_verify_for_all_members() {
        for count in 1..=9 {
            let ids: Vec<String> = (0..count).map(|i| format!("fence-{i}")).collect();
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let items = fences(&id_refs);
            let tree = MerkleTree::build(&items).expect("build");
            let root = tree.root();

            for item in &items {
                let proof = tree.proof(&item.id).expect("proof");
                assert!(
                    verify_fence_proof(item, &proof, &root).expect("verify"),
                    "member proof failed for {} of {count}",
                    item.id
                );
            }
        }
    }

    #[test]
    fn proof_rejects_non_member_and_wrong_root() {
        let items = fences(&["a", "b", "c"]);
        let tree = MerkleTree::build(&items).expect("build");
        let root = tree.root();

        let proof = tree.proof("a").expect("proof");
        let outsider = fence("z", 7);
        assert!(!verify_fence_proof(&outsider, &proof, &root).expect("verify"));
        assert!(!verify_fence_proof(&items[0], &proof, &Hash32::ZERO).expect("verify"));
    }

    #[test]
    fn proof_side_tags_are_load_bearing() {
        let items = fences(&["a", "b"]);
        let tree = MerkleTree::build(&items).expect("build");
        let root = tree.root();

        let mut proof = tree.proof("a").expect("proof");
        assert_eq!(proof.len(), 1);
        proof[0].side = match proof[0].side {
            ProofSide::Left => ProofSide::Right,
            ProofSide::Right => ProofSide::Left,
        };
        assert!(!verify_fence_proof(&items[0], &proof, &root).expect("verify"));
    }

    #[test]
    fn odd_arity_carries_last_node_unmodified() {
        // With three leaves the third is carried to level one, so its proof
        // has a single step: the hash of the first pair, composed on the left.
        let items = fences(&["a", "b", "c"]);
        let tree = MerkleTree::build(&items).expect("build");

        let proof = tree.proof("c").expect("proof");
        assert_eq!(proof.len(), 1);
        assert_eq!(proof[0].side, ProofSide::Left);

        let leaf_a = compute_sha256(&items[0].leaf_bytes().expect("leaf"));
        let leaf_b = compute_sha256(&items[1].leaf_bytes().expect("leaf"));
        assert_eq!(proof[0].hash, hash_pair(&leaf_a, &leaf_b));
    }
}
