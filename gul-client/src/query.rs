// gul-client/src/query.rs
// ============================================================================
// Module: GUL Query Engine
// Description: Point-in-fence evaluation gating flight decisions.
// Purpose: Combine spatial candidates, temporal activity, and priority
//          conflict resolution into a single allowed/denied answer.
// Dependencies: gul-core, gul-store-sqlite
// ============================================================================

//! ## Overview
//! Evaluation is four steps: R-Tree candidates from the store, an
//! activity-window filter at the caller's instant, selection of the highest
//! priority match (ties broken by smallest fence id so every client resolves
//! conflicts identically), and the prohibitive/advisory split. Advisory
//! matches allow flight but expose altitude and speed clamps.

// ============================================================================
// SECTION: Imports
// ============================================================================

use gul_core::CheckResult;
use gul_store_sqlite::SqliteStore;

use crate::errors::SyncError;

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Checks whether flight is allowed at a position and instant.
///
/// Returns `(true, None)` when no active fence contains the point. When the
/// winning fence is advisory the result is allowed and carries the fence so
/// the caller can clamp altitude or speed.
///
/// # Errors
///
/// Returns [`SyncError::Store`] on query failure.
pub fn check_at(store: &SqliteStore, lat: f64, lon: f64, t: i64) -> Result<CheckResult, SyncError> {
    let matching: Vec<_> = store
        .query_point(lat, lon)?
        .into_iter()
        .filter(|fence| fence.is_active_at(t))
        .collect();

    let winner = matching
        .iter()
        .max_by(|a, b| a.priority.cmp(&b.priority).then_with(|| b.id.cmp(&a.id)))
        .cloned();

    let Some(winner) = winner else {
        return Ok(CheckResult {
            allowed: true,
            restriction: None,
            matching,
        });
    };

    let allowed = !winner.fence_type.is_prohibitive();
    Ok(CheckResult {
        allowed,
        restriction: Some(winner),
        matching,
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
