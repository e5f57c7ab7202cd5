// gul-core/src/delta.rs
// ============================================================================
// Module: GUL Binary Delta Codec
// Description: Prefix/suffix byte diff and the framed on-disk delta format.
// Purpose: Encode the byte-level difference between consecutive snapshots
//          with an integrity envelope for CDN distribution.
// Dependencies: crate::crypto, thiserror
// ============================================================================

//! ## Overview
//! The inner diff strips the longest common prefix and suffix from the old
//! and new byte sequences and stores only the changed middle. When the new
//! bytes are shorter than the old, or the length divergence exceeds half of
//! the old length, the new bytes are emitted verbatim; `apply` recognizes
//! the verbatim form because its leading eight bytes decode to a span that
//! cannot fit the old sequence. Inputs where that detection would be
//! ambiguous stay in span encoding. The on-disk form wraps the inner diff in a
//! `GULD` frame carrying version routing, sizes, and a SHA-256 of the
//! payload. Reconstruction length is checked against a ceiling before any
//! allocation happens.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::crypto::Hash32;
use crate::crypto::compute_sha256;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Magic bytes opening every framed delta file.
pub const DELTA_MAGIC: [u8; 4] = *b"GULD";
/// Current framed delta format version.
pub const DELTA_FORMAT_VERSION: u16 = 1;
/// Default ceiling on a reconstructed snapshot, in bytes.
pub const DEFAULT_MAX_EXPANSION: usize = 10 * 1024 * 1024;
/// Fixed byte length of the frame header including the payload hash.
pub const FRAME_HEADER_LEN: usize = 78;
/// Byte length of the inner diff span header.
const SPAN_HEADER_LEN: usize = 8;
/// Verbatim fallback threshold as a fraction of the old length.
const DIVERGENCE_THRESHOLD: f64 = 0.5;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the delta codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    /// Frame magic, version, or structure is malformed.
    #[error("invalid delta format: {0}")]
    InvalidDeltaFormat(String),
    /// Frame targets a different version than expected.
    #[error("delta version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version the caller is updating to.
        expected: u64,
        /// Version recorded in the frame.
        found: u64,
    },
    /// Payload bytes do not match the embedded hash.
    #[error("delta integrity failure: {0}")]
    IntegrityFailure(String),
    /// Reconstructed output would exceed the configured ceiling.
    #[error("delta expansion too large: {actual} bytes (max {max})")]
    DeltaTooLarge {
        /// Reconstructed size in bytes.
        actual: usize,
        /// Configured ceiling in bytes.
        max: usize,
    },
}

// ============================================================================
// SECTION: Inner Diff
// ============================================================================

/// Computes the byte delta from `old` to `new`.
///
/// The result either carries a span header followed by the changed middle,
/// or the new bytes verbatim when diffing cannot win. The verbatim form is
/// only chosen when [`apply`] will recognize it as such; ambiguous inputs
/// fall back to the span encoding, which is always unambiguous.
#[must_use]
pub fn diff(old: &[u8], new: &[u8]) -> Vec<u8> {
    let prefer_verbatim = new.len() < old.len()
        || old.is_empty()
        || (new.len() - old.len()) as f64 / old.len() as f64 > DIVERGENCE_THRESHOLD;
    if prefer_verbatim && decode_span(old, new).is_none() {
        return new.to_vec();
    }

    let prefix = common_prefix_len(old, new);
    let suffix = common_suffix_len(&old[prefix..], &new[prefix..]);

    let mut delta = Vec::with_capacity(SPAN_HEADER_LEN + new.len() - prefix - suffix);
    delta.extend_from_slice(&(prefix as u32).to_le_bytes());
    delta.extend_from_slice(&(suffix as u32).to_le_bytes());
    delta.extend_from_slice(&new[prefix..new.len() - suffix]);
    delta
}

/// Applies a delta produced by [`diff`] to the old bytes.
///
/// # Errors
///
/// Returns [`DeltaError::DeltaTooLarge`] when the reconstructed length
/// exceeds `max_size`; the check runs before any allocation.
pub fn apply(old: &[u8], delta: &[u8], max_size: usize) -> Result<Vec<u8>, DeltaError> {
    let Some(span) = decode_span(old, delta) else {
        // Verbatim form: the delta bytes are the new sequence.
        if delta.len() > max_size {
            return Err(DeltaError::DeltaTooLarge {
                actual: delta.len(),
                max: max_size,
            });
        }
        return Ok(delta.to_vec());
    };
    let (prefix, suffix) = span;

    let middle = &delta[SPAN_HEADER_LEN..];
    let total = prefix + middle.len() + suffix;
    if total > max_size {
        return Err(DeltaError::DeltaTooLarge {
            actual: total,
            max: max_size,
        });
    }

    let mut result = Vec::with_capacity(total);
    result.extend_from_slice(&old[..prefix]);
    result.extend_from_slice(middle);
    result.extend_from_slice(&old[old.len() - suffix..]);
    Ok(result)
}

/// Decodes the span header, returning `None` for the verbatim form.
fn decode_span(old: &[u8], delta: &[u8]) -> Option<(usize, usize)> {
    if delta.len() < SPAN_HEADER_LEN {
        return None;
    }
    let prefix = u32::from_le_bytes(delta[0..4].try_into().expect("4 bytes")) as usize;
    let suffix = u32::from_le_bytes(delta[4..8].try_into().expect("4 bytes")) as usize;
    // A span that cannot fit the old sequence marks the verbatim form.
    if prefix > old.len() || suffix > old.len() - prefix {
        return None;
    }
    Some((prefix, suffix))
}

/// Length of the common prefix of two byte slices.
fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Length of the common suffix of two byte slices.
fn common_suffix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().rev().zip(b.iter().rev()).take_while(|(x, y)| x == y).count()
}

// ============================================================================
// SECTION: Framed Container
// ============================================================================

/// A decoded framed delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaFrame {
    /// Version the delta applies on top of.
    pub from_version: u64,
    /// Version the delta produces.
    pub to_version: u64,
    /// Byte length of the old snapshot.
    pub old_size: u64,
    /// Byte length of the new snapshot.
    pub new_size: u64,
    /// Inner diff payload.
    pub payload: Vec<u8>,
}

impl DeltaFrame {
    /// Serializes the frame: magic, version, routing, sizes, payload hash,
    /// payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&DELTA_MAGIC);
        out.extend_from_slice(&DELTA_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.from_version.to_le_bytes());
        out.extend_from_slice(&self.to_version.to_le_bytes());
        out.extend_from_slice(&self.old_size.to_le_bytes());
        out.extend_from_slice(&self.new_size.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
        out.extend_from_slice(compute_sha256(&self.payload).as_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses and verifies a framed delta.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::InvalidDeltaFormat`] on bad magic, version, or
    /// truncation, [`DeltaError::VersionMismatch`] when the frame does not
    /// target `expected_to_version`, and [`DeltaError::IntegrityFailure`]
    /// when the payload does not match the embedded hash.
    pub fn decode(bytes: &[u8], expected_to_version: u64) -> Result<Self, DeltaError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(DeltaError::InvalidDeltaFormat("frame truncated".to_string()));
        }
        if bytes[0..4] != DELTA_MAGIC {
            return Err(DeltaError::InvalidDeltaFormat(format!(
                "bad magic: {:02x?}",
                &bytes[0..4]
            )));
        }
        let format_version = u16::from_le_bytes(bytes[4..6].try_into().expect("2 bytes"));
        if format_version != DELTA_FORMAT_VERSION {
            return Err(DeltaError::InvalidDeltaFormat(format!(
                "unsupported format version: {format_version}"
            )));
        }

        let from_version = read_u64(bytes, 6);
        let to_version = read_u64(bytes, 14);
        let old_size = read_u64(bytes, 22);
        let new_size = read_u64(bytes, 30);
        let diff_size = read_u64(bytes, 38);
        let embedded_hash = Hash32(bytes[46..78].try_into().expect("32 bytes"));

        let Ok(diff_len) = usize::try_from(diff_size) else {
            return Err(DeltaError::InvalidDeltaFormat("diff size exceeds usize".to_string()));
        };
        if bytes.len() - FRAME_HEADER_LEN != diff_len {
            return Err(DeltaError::InvalidDeltaFormat(format!(
                "payload length {} does not match declared diff size {diff_len}",
                bytes.len() - FRAME_HEADER_LEN
            )));
        }

        if to_version != expected_to_version {
            return Err(DeltaError::VersionMismatch {
                expected: expected_to_version,
                found: to_version,
            });
        }

        let payload = bytes[FRAME_HEADER_LEN..].to_vec();
        if !compute_sha256(&payload).ct_eq(&embedded_hash) {
            return Err(DeltaError::IntegrityFailure(
                "payload hash does not match frame header".to_string(),
            ));
        }

        Ok(Self {
            from_version,
            to_version,
            old_size,
            new_size,
            payload,
        })
    }
}

/// Builds a framed delta between two snapshots.
#[must_use]
pub fn frame_diff(old: &[u8], new: &[u8], from_version: u64, to_version: u64) -> DeltaFrame {
    DeltaFrame {
        from_version,
        to_version,
        old_size: old.len() as u64,
        new_size: new.len() as u64,
        payload: diff(old, new),
    }
}

/// Reads a little-endian u64 at a byte offset.
fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().expect("8 bytes"))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_diff_roundtrip() {
        let old = b"the quick brown fox jumps over the lazy dog".to_vec();
        let new = b"the quick brown cat jumps over the lazy dog".to_vec();
        let delta = diff(&old, &new);
        assert!(delta.len() < new.len());
        assert_eq!(apply(&old, &delta, DEFAULT_MAX_EXPANSION).expect("apply"), new);
    }

    #[test]
    fn identical_inputs_produce_empty_middle() {
        let data = b"unchanged payload".to_vec();
        let delta = diff(&data, &data);
        assert_eq!(delta.len(), 8);
        assert_eq!(apply(&data, &delta, DEFAULT_MAX_EXPANSION).expect("apply"), data);
    }

    #[test]
    fn shrinking_input_goes_verbatim() {
        let old = b"a much longer original sequence".to_vec();
        let new = b"short".to_vec();
        let delta = diff(&old, &new);
        assert_eq!(delta, new);
        assert_eq!(apply(&old, &delta, DEFAULT_MAX_EXPANSION).expect("apply"), new);
    }

    #[test]
    fn divergent_input_goes_verbatim() {
        let old = b"aaaa".to_vec();
        let new = b"aaaabbbbbbbbbb".to_vec();
        let delta = diff(&old, &new);
        assert_eq!(delta, new);
        assert_eq!(apply(&old, &delta, DEFAULT_MAX_EXPANSION).expect("apply"), new);
    }

    #[test]
    fn empty_old_goes_verbatim() {
        let new = b"fresh content".to_vec();
        let delta = diff(&[], &new);
        assert_eq!(delta, new);
        assert_eq!(apply(&[], &delta, DEFAULT_MAX_EXPANSION).expect("apply"), new);
    }

    #[test]
    fn expansion_cap_enforced() {
        let old = vec![7u8; 64];
        let mut delta = Vec::new();
        delta.extend_from_slice(&32u32.to_le_bytes());
        delta.extend_from_slice(&32u32.to_le_bytes());
        delta.extend_from_slice(&vec![1u8; 128]);
        let err = apply(&old, &delta, 100).expect_err("cap");
        assert!(matches!(err, DeltaError::DeltaTooLarge { actual: 192, max: 100 }));
    }

    #[test]
    fn verbatim_cap_enforced() {
        let err = apply(b"old", b"way too big for the cap", 4).expect_err("cap");
        assert!(matches!(err, DeltaError::DeltaTooLarge { .. }));
    }

    #[test]
    fn frame_roundtrip() {
        let old = b"version one of the snapshot".to_vec();
        let new = b"version two of the snapshot".to_vec();
        let frame = frame_diff(&old, &new, 1, 2);
        let encoded = frame.encode();

        assert_eq!(&encoded[0..4], b"GULD");
        let decoded = DeltaFrame::decode(&encoded, 2).expect("decode");
        assert_eq!(decoded, frame);
        assert_eq!(apply(&old, &decoded.payload, DEFAULT_MAX_EXPANSION).expect("apply"), new);
    }

    #[test]
    fn frame_rejects_bad_magic_and_version() {
        let frame = frame_diff(b"a", b"b", 1, 2);
        let mut encoded = frame.encode();
        encoded[0] = b'X';
        assert!(matches!(
            DeltaFrame::decode(&encoded, 2),
            Err(DeltaError::InvalidDeltaFormat(_))
        ));

        let mut encoded = frame.encode();
        encoded[4] = 9;
        assert!(matches!(
            DeltaFrame::decode(&encoded, 2),
            Err(DeltaError::InvalidDeltaFormat(_))
        ));
    }

    #[test]
    fn frame_rejects_wrong_target_version() {
        let encoded = frame_diff(b"a", b"b", 1, 2).encode();
        assert!(matches!(
            DeltaFrame::decode(&encoded, 3),
            Err(DeltaError::VersionMismatch { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn frame_detects_payload_corruption() {
        let old = b"version one of the snapshot data".to_vec();
        let new = b"version two of the snapshot data".to_vec();
        let mut encoded = frame_diff(&old, &new, 1, 2).encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(matches!(
            DeltaFrame::decode(&encoded, 2),
            Err(DeltaError::IntegrityFailure(_))
        ));
    }

    #[test]
    fn frame_rejects_truncation() {
        let encoded = frame_diff(b"aaaa", b"aaab", 1, 2).encode();
        assert!(matches!(
            DeltaFrame::decode(&encoded[..encoded.len() - 1], 2),
            Err(DeltaError::InvalidDeltaFormat(_))
        ));
        assert!(matches!(
            DeltaFrame::decode(&encoded[..20], 2),
            Err(DeltaError::InvalidDeltaFormat(_))
        ));
    }
}
