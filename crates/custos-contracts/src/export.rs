//! Compliance export bundle format.
//!
//! The bundle is a flat, explicitly versioned structure.  Readers ignore fields
//! they do not know, so adding a field never breaks an older verifier; a
//! breaking layout change bumps `format_version`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{AuditEvent, Hash256, ScopeId};

/// Current bundle layout version.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Hash function named in every bundle.
pub const HASH_ALGORITHM: &str = "sha-256";

/// Canonical encoding named in every bundle.
pub const CANONICAL_ENCODING: &str = "custos-canonical-v1";

/// A self-contained, independently verifiable slice of one scope's chain.
///
/// A consumer recomputes the chain over `events` starting at
/// `anchor_link_hash` and compares the final link hash to `range_head_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub format_version: u32,

    /// Unique id of this export, for cross-referencing submissions.
    pub bundle_id: Uuid,

    pub scope_id: ScopeId,

    pub from_sequence: u64,

    pub to_sequence: u64,

    /// `previous_link_hash` of the first exported event.  The genesis
    /// constant when `from_sequence == 0`.
    pub anchor_link_hash: Hash256,

    /// Events `from_sequence..=to_sequence` in ascending order.
    pub events: Vec<AuditEvent>,

    /// `link_hash` of the last exported event.
    pub range_head_hash: Hash256,

    pub generated_at: DateTime<Utc>,

    /// Identity of the system that produced the export.
    pub exporter_id: String,

    pub hash_algorithm: String,

    pub encoding: String,

    /// Optional signature over the bundle digest, supplied by an external attestor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
}

/// An external party's statement over a bundle digest.
///
/// The ledger does not define a signature scheme; `algorithm` and
/// `signature` are opaque strings owned by the attestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub attestor_id: String,

    pub algorithm: String,

    /// The bundle digest the attestor signed.
    pub bundle_digest: Hash256,

    pub signature: String,

    pub attested_at: DateTime<Utc>,
}
