//! Audit event, identifier, and hash types.
//!
//! `AuditEvent` is a single committed entry in one scope's hash chain.  It is
//! produced exactly once by the chain linker and never modified afterwards;
//! corrections are new events that reference an earlier `sequence`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of an independent audit domain (e.g. one estate).
///
/// Every scope has its own gapless sequence and its own hash chain.
/// Example: `ScopeId("estate-7")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ScopeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Who or what performed an audited action.
///
/// The ledger does not authenticate actors; the identity is supplied by the
/// caller's authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    /// Reserved actor for automated actions not attributable to a user.
    pub const SYSTEM: &'static str = "system";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    pub fn is_system(&self) -> bool {
        self.0 == Self::SYSTEM
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A 256-bit digest.
///
/// Serialized as 64 lowercase hex characters so exported bundles stay
/// readable and diffable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// All-zero value.  Reserved as the `previous_link_hash` of genesis.
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

/// Error returned when a string is not a 64-character hex digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hash '{input}': expected 64 hex characters")]
pub struct ParseHashError {
    pub input: String,
}

impl FromStr for Hash256 {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| ParseHashError {
            input: s.to_string(),
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One immutable record of an administrative action.
///
/// `payload_hash` commits to the event's own content; `link_hash` binds that
/// content to the predecessor's `link_hash` and to `sequence`.  Changing any
/// stored field invalidates at least one of the two, which the verifier
/// detects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in the scope's chain.  Gapless, starting at 0.
    pub sequence: u64,

    /// The audit domain this event belongs to.
    pub scope_id: ScopeId,

    /// Assigned by the ledger at commit time (UTC).
    pub occurred_at: DateTime<Utc>,

    pub actor: ActorId,

    /// Namespaced tag owned by the caller, e.g. `claim.validate`.
    pub action_type: String,

    /// Human-readable summary, stored verbatim.
    pub description: String,

    /// Caller-defined structured detail.  Never interpreted by the ledger.
    pub payload: serde_json::Value,

    /// Digest of the canonical encoding of the content fields.
    pub payload_hash: Hash256,

    /// `link_hash` of the event at `sequence - 1`, or the genesis constant.
    pub previous_link_hash: Hash256,

    /// Digest of `payload_hash ‖ previous_link_hash ‖ BE(sequence)`.
    pub link_hash: Hash256,
}

impl AuditEvent {
    pub fn is_genesis(&self) -> bool {
        self.sequence == 0
    }
}

/// The committed head of one scope's chain.
///
/// An empty scope sits at the genesis position: no sequence, and the genesis
/// constant as its link hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Sequence of the latest committed event, `None` for an empty scope.
    pub sequence: Option<u64>,

    /// `link_hash` of the latest committed event, or the genesis constant.
    pub link_hash: Hash256,

    /// `occurred_at` of the latest committed event.
    pub occurred_at: Option<DateTime<Utc>>,
}

impl ChainHead {
    pub fn genesis() -> Self {
        Self {
            sequence: None,
            link_hash: Hash256::ZERO,
            occurred_at: None,
        }
    }

    pub fn of(event: &AuditEvent) -> Self {
        Self {
            sequence: Some(event.sequence),
            link_hash: event.link_hash,
            occurred_at: Some(event.occurred_at),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.sequence.is_none()
    }

    /// The sequence the next appended event will receive.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.map_or(0, |s| s + 1)
    }
}

impl Default for ChainHead {
    fn default() -> Self {
        Self::genesis()
    }
}
