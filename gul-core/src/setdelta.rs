// gul-core/src/setdelta.rs
// ============================================================================
// Module: GUL Fence Set Delta
// Description: Logical per-item difference between two fence sets.
// Purpose: Report which fences a version transition added, updated, and
//          removed, independent of the byte-level delta codec.
// Dependencies: crate::fence, serde, thiserror
// ============================================================================

//! ## Overview
//! The byte delta moves snapshots over the wire; this module answers the
//! human question of what changed. Updated means any field other than the
//! signature differs; re-signing alone does not count as a change.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::fence::FenceItem;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when applying a logical delta.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetDeltaError {
    /// An added fence already exists.
    #[error("fence already exists: {0}")]
    AlreadyExists(String),
    /// An updated fence does not exist.
    #[error("fence not found: {0}")]
    NotFound(String),
}

// ============================================================================
// SECTION: Delta
// ============================================================================

/// Logical changes between two fence sets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FenceSetDelta {
    /// Fences present only in the new set.
    pub added: Vec<FenceItem>,
    /// Fences present in both sets with differing content.
    pub updated: Vec<FenceItem>,
    /// Identifiers present only in the old set.
    pub removed_ids: Vec<String>,
}

impl FenceSetDelta {
    /// Returns whether the delta carries no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed_ids.is_empty()
    }
}

/// Computes the logical delta from `old` to `new`.
///
/// Output ordering is by fence identifier so results are stable.
#[must_use]
pub fn compute_set_delta(old: &[FenceItem], new: &[FenceItem]) -> FenceSetDelta {
    let old_map: BTreeMap<&str, &FenceItem> = old.iter().map(|f| (f.id.as_str(), f)).collect();
    let new_map: BTreeMap<&str, &FenceItem> = new.iter().map(|f| (f.id.as_str(), f)).collect();

    let mut delta = FenceSetDelta::default();
    for (id, old_fence) in &old_map {
        match new_map.get(id) {
            None => delta.removed_ids.push((*id).to_string()),
            Some(new_fence) if !content_equal(old_fence, new_fence) => {
                delta.updated.push((*new_fence).clone());
            }
            Some(_) => {}
        }
    }
    for (id, new_fence) in &new_map {
        if !old_map.contains_key(id) {
            delta.added.push((*new_fence).clone());
        }
    }
    delta
}

/// Applies a logical delta to an existing fence set.
///
/// # Errors
///
/// Returns [`SetDeltaError`] when an addition collides or an update targets
/// a missing fence.
pub fn apply_set_delta(
    existing: &[FenceItem],
    delta: &FenceSetDelta,
) -> Result<Vec<FenceItem>, SetDeltaError> {
    let mut map: BTreeMap<String, FenceItem> =
        existing.iter().map(|f| (f.id.clone(), f.clone())).collect();

    for id in &delta.removed_ids {
        map.remove(id);
    }
    for fence in &delta.added {
        if map.contains_key(&fence.id) {
            return Err(SetDeltaError::AlreadyExists(fence.id.clone()));
        }
        map.insert(fence.id.clone(), fence.clone());
    }
    for fence in &delta.updated {
        if !map.contains_key(&fence.id) {
            return Err(SetDeltaError::NotFound(fence.id.clone()));
        }
        map.insert(fence.id.clone(), fence.clone());
    }

    Ok(map.into_values().collect())
}

/// Content equality ignoring the signature bytes.
fn content_equal(a: &FenceItem, b: &FenceItem) -> bool {
    a.id == b.id
        && a.fence_type == b.fence_type
        && a.geometry == b.geometry
        && a.start_ts == b.start_ts
        && a.end_ts == b.end_ts
        && a.priority == b.priority
        && a.max_altitude_m == b.max_altitude_m
        && a.max_speed_mps == b.max_speed_mps
        && a.name == b.name
        && a.description == b.description
        && a.key_id == b.key_id
}

// ============================================================================
// SECTION: Tests
// ============================================================================
