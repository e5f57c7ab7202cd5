// gul-core/src/fence.rs
// ============================================================================
// Module: GUL Fence Model
// Description: Fence items, activity windows, and canonical byte forms.
// Purpose: Define the signed unit of distribution and the exact bytes that
//          signatures and Merkle leaves commit to.
// Dependencies: crate::{crypto, geometry}, serde, serde_jcs, thiserror
// ============================================================================

//! ## Overview
//! A [`FenceItem`] is a single geographically scoped flight restriction or
//! advisory. Two canonical byte forms exist and they are deliberately
//! different: the pre-signature form drops both signature and key id (the
//! signature covers the restriction content, not the key routing), while the
//! Merkle leaf form clears only the signature so the commitment still binds
//! which key signed each item. Both use RFC 8785 canonical JSON so publisher
//! and clients reach byte-identical encodings.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::crypto::KeyPair;
use crate::crypto::PublicKey;
use crate::geometry::BoundingBox;
use crate::geometry::Geometry;
use crate::geometry::GeometryError;
use crate::geometry::Point;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by fence validation and canonical encoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FenceError {
    /// Structural invariant violation on the fence item.
    #[error("invalid fence: {0}")]
    Invalid(String),
    /// Embedded geometry failed validation.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// Canonical JSON encoding failed.
    #[error("canonical encoding failed: {0}")]
    Encoding(String),
}

// ============================================================================
// SECTION: Fence Type
// ============================================================================

/// Category of a geofence restriction.
///
/// Prohibitive kinds forbid flight outright; advisory kinds return a
/// restriction for the caller to clamp altitude or speed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceType {
    /// Temporary restriction for events or emergencies.
    TempRestriction,
    /// Permanent no-fly zone.
    PermanentNoFly,
    /// Maximum altitude restriction.
    AltitudeLimit,
    /// Minimum altitude requirement.
    AltitudeMinimum,
    /// Speed restriction zone.
    SpeedLimit,
}

impl FenceType {
    /// Returns whether this kind forbids flight when matched.
    #[must_use]
    pub const fn is_prohibitive(self) -> bool {
        matches!(self, Self::TempRestriction | Self::PermanentNoFly)
    }

    /// Stable integer code used by the persistent store.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::TempRestriction => 1,
            Self::PermanentNoFly => 2,
            Self::AltitudeLimit => 3,
            Self::AltitudeMinimum => 4,
            Self::SpeedLimit => 5,
        }
    }

    /// Decodes a stable integer code.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::TempRestriction),
            2 => Some(Self::PermanentNoFly),
            3 => Some(Self::AltitudeLimit),
            4 => Some(Self::AltitudeMinimum),
            5 => Some(Self::SpeedLimit),
            _ => None,
        }
    }
}

impl std::fmt::Display for FenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::TempRestriction => "TEMP_RESTRICTION",
            Self::PermanentNoFly => "PERMANENT_NO_FLY",
            Self::AltitudeLimit => "ALTITUDE_LIMIT",
            Self::AltitudeMinimum => "ALTITUDE_MINIMUM",
            Self::SpeedLimit => "SPEED_LIMIT",
        };
        f.write_str(label)
    }
}

// ============================================================================
// SECTION: Fence Item
// ============================================================================

/// A single geofence restriction: the unit that is signed and distributed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FenceItem {
    /// Unique, non-empty identifier within a dataset version.
    pub id: String,
    /// Restriction category.
    #[serde(rename = "type")]
    pub fence_type: FenceType,
    /// Spatial shape.
    pub geometry: Geometry,
    /// Activation time, Unix seconds.
    #[serde(default)]
    pub start_ts: i64,
    /// Expiry time, Unix seconds; 0 means the fence never expires.
    #[serde(default)]
    pub end_ts: i64,
    /// Conflict-resolution priority; larger wins.
    #[serde(default)]
    pub priority: u32,
    /// Maximum altitude in meters; 0 means unlimited.
    #[serde(default)]
    pub max_altitude_m: u32,
    /// Maximum speed in meters per second; 0 means unlimited.
    #[serde(default)]
    pub max_speed_mps: u32,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Ed25519 signature over the pre-signature canonical bytes.
    #[serde(with = "hex_bytes", default, skip_serializing_if = "Vec::is_empty")]
    pub signature: Vec<u8>,
    /// Identifier of the key that produced the signature.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_id: String,
}

impl FenceItem {
    /// Returns whether the fence is active at the given Unix second.
    ///
    /// Active means `start_ts <= t` and (`end_ts == 0` or `t <= end_ts`).
    #[must_use]
    pub fn is_active_at(&self, t: i64) -> bool {
        if t < self.start_ts {
            return false;
        }
        self.end_ts == 0 || t <= self.end_ts
    }

    /// Returns whether the fence geometry contains the point.
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        self.geometry.contains(p)
    }

    /// Returns the index bounding box of the fence geometry.
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        self.geometry.bounds()
    }

    /// Maximum allowed altitude at a point, in meters.
    ///
    /// Returns `None` when the fence does not constrain altitude here,
    /// `Some(0)` when flight is forbidden outright.
    #[must_use]
    pub fn altitude_limit_at(&self, p: Point, t: i64) -> Option<u32> {
        if !self.contains(p) || !self.is_active_at(t) {
            return None;
        }
        if self.fence_type.is_prohibitive() {
            return Some(0);
        }
        if self.fence_type == FenceType::AltitudeLimit && self.max_altitude_m > 0 {
            return Some(self.max_altitude_m);
        }
        None
    }

    /// Maximum allowed speed at a point, in meters per second.
    #[must_use]
    pub fn speed_limit_at(&self, p: Point, t: i64) -> Option<u32> {
        if !self.contains(p) || !self.is_active_at(t) {
            return None;
        }
        if self.fence_type == FenceType::SpeedLimit && self.max_speed_mps > 0 {
            return Some(self.max_speed_mps);
        }
        None
    }

    /// Restriction severity at a point and instant; 0 when the fence does
    /// not apply. Larger values indicate more severe restrictions.
    #[must_use]
    pub fn restriction_level(&self, p: Point, t: i64) -> u32 {
        if !self.contains(p) || !self.is_active_at(t) {
            return 0;
        }
        match self.fence_type {
            FenceType::PermanentNoFly => 100,
            FenceType::TempRestriction => 80,
            FenceType::AltitudeLimit => 50,
            FenceType::AltitudeMinimum => 40,
            FenceType::SpeedLimit => 20,
        }
    }

    /// Validates the fence invariants.
    ///
    /// # Errors
    ///
    /// Returns [`FenceError`] on an empty id, inverted time window, or
    /// invalid geometry.
    pub fn validate(&self) -> Result<(), FenceError> {
        if self.id.is_empty() {
            return Err(FenceError::Invalid("fence id must be non-empty".to_string()));
        }
        if self.end_ts > 0 && self.start_ts > self.end_ts {
            return Err(FenceError::Invalid(format!(
                "fence {} start_ts {} exceeds end_ts {}",
                self.id, self.start_ts, self.end_ts
            )));
        }
        self.geometry.validate()?;
        Ok(())
    }

    /// Canonical pre-signature bytes: every field except signature and key id.
    ///
    /// # Errors
    ///
    /// Returns [`FenceError::Encoding`] when canonical JSON encoding fails.
    pub fn presign_bytes(&self) -> Result<Vec<u8>, FenceError> {
        let view = FencePresign {
            id: &self.id,
            fence_type: self.fence_type,
            geometry: &self.geometry,
            start_ts: self.start_ts,
            end_ts: self.end_ts,
            priority: self.priority,
            max_altitude_m: self.max_altitude_m,
            max_speed_mps: self.max_speed_mps,
            name: &self.name,
            description: &self.description,
        };
        serde_jcs::to_vec(&view).map_err(|err| FenceError::Encoding(err.to_string()))
    }

    /// Canonical Merkle leaf bytes: the item with signature cleared and key
    /// id retained.
    ///
    /// # Errors
    ///
    /// Returns [`FenceError::Encoding`] when canonical JSON encoding fails.
    pub fn leaf_bytes(&self) -> Result<Vec<u8>, FenceError> {
        let mut copy = self.clone();
        copy.signature.clear();
        serde_jcs::to_vec(&copy).map_err(|err| FenceError::Encoding(err.to_string()))
    }

    /// Signs the fence in place, populating signature and key id.
    ///
    /// # Errors
    ///
    /// Returns [`FenceError::Encoding`] when canonical encoding fails.
    pub fn sign(&mut self, key_pair: &KeyPair) -> Result<(), FenceError> {
        let bytes = self.presign_bytes()?;
        self.signature = key_pair.sign(&bytes).to_vec();
        self.key_id = key_pair.key_id();
        Ok(())
    }

    /// Verifies the fence signature against the publisher key.
    ///
    /// A fence counts as signed iff its signature bytes verify over the
    /// pre-signature canonical bytes and the advertised key id matches the
    /// key.
    #[must_use]
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        if self.signature.is_empty() || self.key_id != public_key.key_id() {
            return false;
        }
        let Ok(bytes) = self.presign_bytes() else {
            return false;
        };
        public_key.verify(&bytes, &self.signature)
    }
}

/// Pre-signature serialization view of a fence item.
#[derive(Serialize)]
struct FencePresign<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    fence_type: FenceType,
    geometry: &'a Geometry,
    start_ts: i64,
    end_ts: i64,
    priority: u32,
    max_altitude_m: u32,
    max_speed_mps: u32,
    name: &'a str,
    description: &'a str,
}

// ============================================================================
// SECTION: Fence Collection
// ============================================================================

/// A versioned set of fence items; item order is not semantically relevant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FenceCollection {
    /// Fence items in the dataset.
    pub items: Vec<FenceItem>,
    /// Creation time, Unix seconds.
    pub created_ts: i64,
    /// Free-form version tag.
    #[serde(default)]
    pub version: String,
}

// ============================================================================
// SECTION: Check Result
// ============================================================================

/// Outcome of a point query against the active fence set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Whether flight is allowed at the queried point and time.
    pub allowed: bool,
    /// The winning restriction, when any fence matched.
    pub restriction: Option<FenceItem>,
    /// Every active fence containing the point.
    pub matching: Vec<FenceItem>,
}

// ============================================================================
// SECTION: Hex Byte Serde
// ============================================================================

/// Serde adapter encoding byte vectors as lowercase hex strings.
pub(crate) mod hex_bytes {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
