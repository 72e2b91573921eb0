//! Pure chain walk shared by the live verifier and the bundle checker.
//!
//! Per-event rules, applied in order, stopping at the first failure:
//!
//! 1. **Placement**: the event belongs to the scope and carries the expected
//!    sequence.  A missing prefix is `ChainTruncated`; anything else out of
//!    place is `ChainBroken`.
//! 2. **Content**: the recomputed payload hash equals the stored one, else
//!    `ContentTampered`.
//! 3. **Linkage**: `previous_link_hash` equals the expected predecessor link,
//!    else `ChainBroken`.
//! 4. **Link**: the recomputed link hash equals the stored one, else
//!    `LinkForged`.

use custos_contracts::{
    event::{AuditEvent, Hash256, ScopeId},
    verify::VerificationOutcome,
};
use custos_core::{canonical, hash, EncodingLimits};

/// Incremental verifier over one scope's events in ascending order.
#[derive(Debug, Clone)]
pub struct ChainWalk {
    scope_id: ScopeId,
    start_sequence: u64,
    expected_sequence: u64,
    expected_previous: Hash256,
    checked: u64,
    limits: EncodingLimits,
}

impl ChainWalk {
    /// Start a walk at `start_sequence`, trusting `anchor` as the link hash
    /// of its predecessor (the genesis constant when starting at 0).
    pub fn new(scope_id: ScopeId, start_sequence: u64, anchor: Hash256) -> Self {
        Self {
            scope_id,
            start_sequence,
            expected_sequence: start_sequence,
            expected_previous: anchor,
            checked: 0,
            limits: EncodingLimits::for_verification(),
        }
    }

    pub fn start_sequence(&self) -> u64 {
        self.start_sequence
    }

    /// The sequence the next event must carry.
    pub fn expected_sequence(&self) -> u64 {
        self.expected_sequence
    }

    /// Link hash of the last event that passed, or the anchor.
    pub fn last_link_hash(&self) -> Hash256 {
        self.expected_previous
    }

    pub fn checked(&self) -> u64 {
        self.checked
    }

    pub fn last_sequence(&self) -> Option<u64> {
        (self.checked > 0).then(|| self.expected_sequence - 1)
    }

    /// Check the next event.  On success the walk advances past it.
    pub fn check(&mut self, event: &AuditEvent) -> Result<(), VerificationOutcome> {
        let expected = self.expected_sequence;

        if event.scope_id != self.scope_id {
            return Err(VerificationOutcome::ChainBroken { sequence: expected });
        }
        if event.sequence != expected {
            if self.checked == 0 && event.sequence > expected {
                return Err(VerificationOutcome::ChainTruncated {
                    sequence: expected,
                    found: Some(event.sequence),
                });
            }
            return Err(VerificationOutcome::ChainBroken { sequence: expected });
        }

        // An event that no longer encodes was altered after commit.
        let recomputed = canonical::encode_stored(event, &self.limits)
            .map(|bytes| hash::digest(&bytes))
            .map_err(|_| VerificationOutcome::ContentTampered { sequence: expected })?;
        if recomputed != event.payload_hash {
            return Err(VerificationOutcome::ContentTampered { sequence: expected });
        }

        if event.previous_link_hash != self.expected_previous {
            return Err(VerificationOutcome::ChainBroken { sequence: expected });
        }

        let link = hash::link_hash(&recomputed, &event.previous_link_hash, event.sequence);
        if link != event.link_hash {
            return Err(VerificationOutcome::LinkForged { sequence: expected });
        }

        self.expected_previous = link;
        self.expected_sequence += 1;
        self.checked += 1;
        Ok(())
    }
}

/// Walk `events` from `start_sequence` / `anchor` and return the outcome
/// together with the walk's final state.
///
/// An empty slice is `Valid`.
pub fn verify_chain(
    scope_id: &ScopeId,
    events: &[AuditEvent],
    start_sequence: u64,
    anchor: Hash256,
) -> (VerificationOutcome, ChainWalk) {
    let mut walk = ChainWalk::new(scope_id.clone(), start_sequence, anchor);
    for event in events {
        if let Err(finding) = walk.check(event) {
            return (finding, walk);
        }
    }
    (VerificationOutcome::Valid, walk)
}
