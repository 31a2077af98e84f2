//! Cryptographic operations for the ledger
//!
//! This module provides:
//! - The hash-chain link function (SHA-256, length-prefixed framing)
//! - Canonical JSON and timestamp rendering for hash inputs
//! - Ed25519 key pairs for optionally sealing entry hashes

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// previousHash of the first entry in every chain.
///
/// Not hexadecimal, so it can never equal a real digest.
pub const GENESIS_HASH: &str = "GENESIS";

/// Compute the link hash of one entry.
///
/// Each input is framed as `len (u64 BE) || bytes` so that no two distinct
/// input tuples serialize to the same byte stream.
pub fn compute_hash(
    action: &str,
    payload_snapshot: &str,
    timestamp_iso: &str,
    previous_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    for field in [action, payload_snapshot, timestamp_iso, previous_hash] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Whether a string has the shape of a digest produced by [`compute_hash`]
pub fn is_digest(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Serialize with sorted object keys.
///
/// `serde_json::Value` objects are ordered maps, so going through `Value`
/// yields the same string for the same logical content.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(value) => value.to_string(),
        // Only non-string map keys fail here; entry payloads never have them
        Err(_) => String::new(),
    }
}

/// RFC 3339, UTC, microseconds, `Z` suffix
pub fn timestamp_iso(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Drop sub-microsecond precision so stored and hashed timestamps agree
pub fn truncate_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// Ed25519 key pair for sealing entry hashes
#[derive(Debug)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// Create from seed (32 bytes) - deterministic generation
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Sign an entry hash, returning the hex signature
    pub fn seal(&self, hash: &str) -> String {
        hex::encode(self.signing_key.sign(hash.as_bytes()).to_bytes())
    }
}

/// Verify a hex seal over an entry hash
pub fn verify_seal(hash: &str, seal_hex: &str, public_key: &[u8; 32]) -> Result<()> {
    let bytes = hex::decode(seal_hex)
        .map_err(|e| Error::SignatureError(format!("seal is not hex: {}", e)))?;
    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|_| Error::SignatureError("seal must be 64 bytes".to_string()))?;

    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| Error::SignatureError(format!("bad public key: {}", e)))?;

    verifying_key
        .verify(hash.as_bytes(), &DalekSignature::from_bytes(&bytes))
        .map_err(|e| Error::SignatureError(format!("Verification failed: {}", e)))
}
