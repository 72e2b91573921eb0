//! SHA-256 hash engine.
//!
//! Unkeyed on purpose: this is an integrity chain, not a MAC.  The link
//! input layout is fixed:
//!
//!   payload_hash (32 bytes) ‖ previous_link_hash (32 bytes) ‖ sequence (8 bytes, big-endian)

use serde_json::Value;
use sha2::{Digest, Sha256};

use custos_contracts::{error::LedgerResult, event::Hash256};

use crate::canonical::{self, CanonicalPayload, EncodingLimits, EventFields};

/// `previous_link_hash` of every genesis event.
///
/// 32 zero bytes.  Finding a real link input that hashes to it is as hard as
/// inverting SHA-256.
pub const GENESIS_LINK_HASH: Hash256 = Hash256::ZERO;

pub fn digest(bytes: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(bytes).into())
}

/// Digest binding an event's content to its predecessor and position.
pub fn link_hash(payload_hash: &Hash256, previous_link_hash: &Hash256, sequence: u64) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(payload_hash.as_bytes());
    hasher.update(previous_link_hash.as_bytes());
    hasher.update(sequence.to_be_bytes());
    Hash256(hasher.finalize().into())
}

/// Digest of the canonical encoding of an event's content fields.
pub fn payload_hash(fields: &EventFields<'_>, payload: &Value, limits: &EncodingLimits) -> LedgerResult<Hash256> {
    Ok(digest(&canonical::encode(fields, payload, limits)?))
}

/// Same as [`payload_hash`] for a payload that was encoded up front.
pub fn payload_hash_with(
    fields: &EventFields<'_>,
    payload: &CanonicalPayload,
    limits: &EncodingLimits,
) -> LedgerResult<Hash256> {
    Ok(digest(&canonical::encode_with_payload(fields, payload, limits)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_sha256_vector() {
        assert_eq!(
            digest(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn link_hash_depends_on_every_input() {
        let p = digest(b"payload");
        let prev = digest(b"previous");
        let base = link_hash(&p, &prev, 1);

        assert_ne!(base, link_hash(&digest(b"other"), &prev, 1));
        assert_ne!(base, link_hash(&p, &GENESIS_LINK_HASH, 1));
        assert_ne!(base, link_hash(&p, &prev, 2));
        assert_eq!(base, link_hash(&p, &prev, 1));
    }

    #[test]
    fn link_hash_encodes_sequence_big_endian() {
        let p = digest(b"payload");
        let mut input = Vec::new();
        input.extend_from_slice(p.as_bytes());
        input.extend_from_slice(GENESIS_LINK_HASH.as_bytes());
        input.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(link_hash(&p, &GENESIS_LINK_HASH, 7), digest(&input));
    }

    #[test]
    fn genesis_constant_is_all_zero() {
        assert!(GENESIS_LINK_HASH.is_zero());
    }
}
