//! Verification outcome and report types.
//!
//! A verification run either confirms the chain (`Valid`) or stops at the
//! first finding and names the lowest offending sequence.  Findings are data,
//! not errors: they are security-relevant results that must reach a human.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Hash256, ScopeId};

/// What a verification run concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// Every checked event recomputed and linked correctly.
    Valid,

    /// The stored content no longer matches its `payload_hash`.
    ContentTampered { sequence: u64 },

    /// `previous_link_hash` does not match the predecessor: an event was
    /// inserted, removed, reordered, or moved in from another scope.
    ChainBroken { sequence: u64 },

    /// The stored `link_hash` does not match the recomputed link.
    LinkForged { sequence: u64 },

    /// Events that must exist are missing from the store: a purged prefix,
    /// or a tail shorter than the recorded head.
    ChainTruncated {
        /// The first sequence that should have been present.
        sequence: u64,
        /// The sequence actually found in its place, if any.
        found: Option<u64>,
    },
}

impl VerificationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// The offending sequence, or `None` for `Valid`.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Valid => None,
            Self::ContentTampered { sequence }
            | Self::ChainBroken { sequence }
            | Self::LinkForged { sequence }
            | Self::ChainTruncated { sequence, .. } => Some(*sequence),
        }
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => f.write_str("valid"),
            Self::ContentTampered { sequence } => {
                write!(f, "content tampered at sequence {sequence}")
            }
            Self::ChainBroken { sequence } => write!(f, "chain broken at sequence {sequence}"),
            Self::LinkForged { sequence } => write!(f, "link forged at sequence {sequence}"),
            Self::ChainTruncated { sequence, found: Some(found) } => write!(
                f,
                "chain truncated: expected sequence {sequence}, found {found}"
            ),
            Self::ChainTruncated { sequence, found: None } => {
                write!(f, "chain truncated: sequence {sequence} is missing")
            }
        }
    }
}

/// The result of verifying one scope (or a range of it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub scope_id: ScopeId,

    /// First sequence the walk started from (0 unless a checkpoint was used).
    pub verified_from: u64,

    /// Last sequence the walk reached, `None` when nothing was checked.
    pub verified_through: Option<u64>,

    /// Number of events that passed every check.
    pub events_checked: u64,

    /// `link_hash` of the last event that passed, or the starting anchor.
    pub last_link_hash: Hash256,

    pub outcome: VerificationOutcome,

    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.outcome.is_valid()
    }
}
