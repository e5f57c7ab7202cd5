// gul-core/src/crypto.rs
// ============================================================================
// Module: GUL Crypto Primitives
// Description: Ed25519 signing, SHA-256 hashing, and key identifiers.
// Purpose: Provide the single signature and hash primitive pair used by
//          fences, manifests, Merkle nodes, and artifact integrity checks.
// Dependencies: ed25519-dalek, sha2, rand, zeroize, subtle, hex, serde
// ============================================================================

//! ## Overview
//! Every signed byte sequence in GUL is signed with Ed25519 and every digest
//! is SHA-256, so publisher and client maintain exactly one signature scheme
//! and one hash primitive. Key identifiers are the leading 16 bytes of the
//! SHA-256 of the public key, lowercase hex. Digest and signature equality
//! uses constant-time comparison.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use ed25519_dalek::Verifier;
use ed25519_dalek::VerifyingKey;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Size of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Size of an Ed25519 private key seed in bytes.
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;
/// Number of leading SHA-256 bytes used for a key identifier.
pub const KEY_ID_BYTES: usize = 16;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the crypto primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key bytes have the wrong size or do not decode to a curve point.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Signature bytes have the wrong size.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    /// The operating system RNG failed during key generation.
    #[error("crypto unavailable: {0}")]
    CryptoUnavailable(String),
}

// ============================================================================
// SECTION: Hash Type
// ============================================================================

/// A SHA-256 digest.
///
/// Serializes as a lowercase hex string on the wire. Equality between
/// digests that guard protocol decisions goes through [`Hash32::ct_eq`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// The all-zero digest, used as the Merkle root of an empty fence set.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Constant-time equality against another digest.
    #[must_use]
    pub fn ct_eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Hash32 {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes =
            hex::decode(s).map_err(|_| CryptoError::InvalidKey("invalid hex digest".to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("digest must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// SECTION: Public Key
// ============================================================================

/// An Ed25519 public key used to verify fences and manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Creates a public key from raw bytes, validating the curve point.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] when the bytes have the wrong size
    /// or do not decode to a valid point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("public key must be {PUBLIC_KEY_SIZE} bytes")))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|_| CryptoError::InvalidKey("public key is not a valid point".to_string()))?;
        Ok(Self(bytes))
    }

    /// Decodes a public key from a lowercase hex string.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] on malformed hex or key bytes.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s.trim())
            .map_err(|_| CryptoError::InvalidKey("public key is not valid hex".to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Encodes the key as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the key identifier for this key.
    #[must_use]
    pub fn key_id(&self) -> String {
        key_id_of(&self.0)
    }

    /// Verifies an Ed25519 signature over `message`.
    ///
    /// Wrong-size signatures return `false` rather than an error so that
    /// callers on the verification path have a single rejection outcome.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(sig_bytes) = <[u8; SIGNATURE_SIZE]>::try_from(signature) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        key.verify(message, &sig).is_ok()
    }
}

// ============================================================================
// SECTION: Key Pair
// ============================================================================

/// An Ed25519 key pair held by the publisher.
///
/// The secret seed is zeroized when the pair is dropped. Keys are immutable
/// after construction; rotation happens by constructing a new pair.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generates a fresh key pair from the operating system RNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::CryptoUnavailable`] only when the OS RNG fails.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; PRIVATE_KEY_SIZE];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|err| CryptoError::CryptoUnavailable(err.to_string()))?;
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { signing_key })
    }

    /// Reconstructs a key pair from a 32-byte secret seed.
    #[must_use]
    pub fn from_seed(seed: [u8; PRIVATE_KEY_SIZE]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Decodes a key pair from a hex-encoded secret seed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] on malformed hex or seed size.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode(s.trim())
            .map_err(|_| CryptoError::InvalidKey("private key is not valid hex".to_string()))?;
        let seed: [u8; PRIVATE_KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("private key must be {PRIVATE_KEY_SIZE} bytes")))?;
        bytes.zeroize();
        Ok(Self::from_seed(seed))
    }

    /// Returns the public half of the pair.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Returns the key identifier of the public half.
    #[must_use]
    pub fn key_id(&self) -> String {
        self.public_key().key_id()
    }

    /// Signs a message, producing a 64-byte Ed25519 signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Returns the secret seed for serialization.
    #[must_use]
    pub fn to_seed(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.signing_key.to_bytes()
    }

    /// Encodes the secret seed as lowercase hex.
    #[must_use]
    pub fn seed_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        let mut seed = self.signing_key.to_bytes();
        seed.zeroize();
    }
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Computes the SHA-256 digest of `data`.
#[must_use]
pub fn compute_sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash32(hasher.finalize().into())
}

/// Constant-time equality of a computed digest against advertised bytes.
#[must_use]
pub fn hashes_equal(data: &[u8], expected: &Hash32) -> bool {
    compute_sha256(data).ct_eq(expected)
}

/// Derives the key identifier for raw public key bytes.
#[must_use]
pub fn key_id_of(public_key: &[u8]) -> String {
    let digest = compute_sha256(public_key);
    hex::encode(&digest.0[..KEY_ID_BYTES])
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let pair = KeyPair::generate().expect("keypair");
        let message = b"restricted airspace dataset";

        let signature = pair.sign(message);
        assert!(pair.public_key().verify(message, &signature));
    }

    #[test]
    fn wrong_message_fails() {
        let pair = KeyPair::generate().expect("keypair");
        let signature = pair.sign(b"message one");
        assert!(!pair.public_key().verify(b"message two", &signature));
    }

    #[test]
    fn wrong_key_fails() {
        let pair = KeyPair::generate().expect("keypair");
        let other = KeyPair::generate().expect("keypair");
        let signature = pair.sign(b"message");
        assert!(!other.public_key().verify(b"message", &signature));
    }

    #[test]
    fn truncated_signature_is_false_not_panic() {
        let pair = KeyPair::generate().expect("keypair");
        let signature = pair.sign(b"message");
        assert!(!pair.public_key().verify(b"message", &signature[..32]));
        assert!(!pair.public_key().verify(b"message", &[]));
    }

    #[test]
    fn seed_roundtrip_preserves_public_key() {
        let pair = KeyPair::generate().expect("keypair");
        let restored = KeyPair::from_seed(pair.to_seed());
        assert_eq!(pair.public_key(), restored.public_key());
    }

    #[test]
    fn hex_roundtrip() {
        let pair = KeyPair::generate().expect("keypair");
        let restored = KeyPair::from_hex(&pair.seed_hex()).expect("hex seed");
        assert_eq!(pair.public_key(), restored.public_key());

        let public = PublicKey::from_hex(&pair.public_key().to_hex()).expect("hex public");
        assert_eq!(public, pair.public_key());
    }

    #[test]
    fn key_id_is_sixteen_bytes_of_hex() {
        let pair = KeyPair::generate().expect("keypair");
        let key_id = pair.key_id();
        assert_eq!(key_id.len(), KEY_ID_BYTES * 2);
        assert!(key_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key_id, pair.public_key().key_id());
    }

    #[test]
    fn sha256_is_deterministic() {
        let a = compute_sha256(b"payload");
        let b = compute_sha256(b"payload");
        assert_eq!(a, b);
        assert!(a.ct_eq(&b));
        assert!(!a.ct_eq(&compute_sha256(b"other")));
    }

    #[test]
    fn hash_hex_serde_roundtrip() {
        let digest = compute_sha256(b"payload");
        let json = serde_json::to_string(&digest).expect("encode");
        let back: Hash32 = serde_json::from_str(&json).expect("decode");
        assert_eq!(digest, back);
    }

    #[test]
    fn invalid_public_key_rejected() {
        assert!(PublicKey::from_bytes(&[0u8; 16]).is_err());
        assert!(PublicKey::from_hex("zz").is_err());
    }
}
