//! Store-backed integrity verifier.
//!
//! `IntegrityVerifier` streams a scope from the store in batches and feeds
//! each event through a `ChainWalk`.  It only reads, so it never blocks
//! appenders, and it polls the caller's `Cancellation` between batches.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use custos_contracts::{
    error::{LedgerError, LedgerResult},
    event::{Hash256, ScopeId},
    verify::{VerificationOutcome, VerificationReport},
};
use custos_core::{Cancellation, LedgerStore, GENESIS_LINK_HASH};

use crate::chain::ChainWalk;

/// Default number of events read per store round-trip.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// A trusted `(sequence, link_hash)` pair, e.g. taken from an earlier
/// export or an external timestamping receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence: u64,
    pub link_hash: Hash256,
}

/// Range and control options for one verification run.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Verify only events after this checkpoint.  Without one the walk
    /// starts at genesis.
    pub checkpoint: Option<Checkpoint>,

    /// Last sequence to verify.  Defaults to the scope's current head.
    pub through: Option<u64>,

    pub cancellation: Cancellation,
}

impl VerifyOptions {
    pub fn through(mut self, sequence: u64) -> Self {
        self.through = Some(sequence);
        self
    }

    pub fn after(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }
}

pub struct IntegrityVerifier {
    store: Arc<dyn LedgerStore>,
    batch_size: usize,
}

impl IntegrityVerifier {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Verify a whole scope from genesis to its current head.
    pub fn verify_scope(&self, scope_id: &ScopeId) -> LedgerResult<VerificationReport> {
        self.verify(scope_id, &VerifyOptions::default())
    }

    /// Verify a scope according to `options`.
    ///
    /// Findings are returned inside the report, never as `Err`.  Errors are
    /// reserved for requests that cannot be answered: a `through` beyond the
    /// head (`NotFound`), storage failures, and cancellation.
    pub fn verify(&self, scope_id: &ScopeId, options: &VerifyOptions) -> LedgerResult<VerificationReport> {
        let head = self.store.head(scope_id)?;

        let (start, anchor) = match options.checkpoint {
            Some(cp) => match cp.sequence.checked_add(1) {
                Some(start) => (start, cp.link_hash),
                None => {
                    // Nothing can be stored after the last representable sequence.
                    let walk = ChainWalk::new(scope_id.clone(), cp.sequence, cp.link_hash);
                    let finding = VerificationOutcome::ChainTruncated {
                        sequence: head.next_sequence(),
                        found: None,
                    };
                    return Ok(self.finish(scope_id, &walk, finding));
                }
            },
            None => (0, GENESIS_LINK_HASH),
        };
        let mut walk = ChainWalk::new(scope_id.clone(), start, anchor);

        if let Some(through) = options.through {
            if head.sequence.map_or(true, |h| through > h) {
                return Err(LedgerError::NotFound {
                    scope_id: scope_id.clone(),
                    sequence: head.next_sequence(),
                });
            }
        }

        if let Some(cp) = options.checkpoint {
            if let Some(finding) = self.check_checkpoint(scope_id, &cp, head.next_sequence())? {
                return Ok(self.finish(scope_id, &walk, finding));
            }
        }

        let Some(through) = options.through.or(head.sequence) else {
            // Empty scope: trivially valid.
            return Ok(self.finish(scope_id, &walk, VerificationOutcome::Valid));
        };

        while walk.expected_sequence() <= through {
            options.cancellation.check("verify")?;

            let remaining = through - walk.expected_sequence() + 1;
            let limit = usize::try_from(remaining).map_or(self.batch_size, |r| r.min(self.batch_size));
            let batch = self.store.scan(scope_id, walk.expected_sequence(), limit)?;
            if batch.is_empty() {
                let finding = VerificationOutcome::ChainTruncated {
                    sequence: walk.expected_sequence(),
                    found: None,
                };
                return Ok(self.finish(scope_id, &walk, finding));
            }

            debug!(
                scope_id = %scope_id,
                from = walk.expected_sequence(),
                len = batch.len(),
                "verifying batch"
            );
            for event in &batch {
                if walk.expected_sequence() > through {
                    break;
                }
                if let Err(finding) = walk.check(event) {
                    return Ok(self.finish(scope_id, &walk, finding));
                }
            }
        }

        Ok(self.finish(scope_id, &walk, VerificationOutcome::Valid))
    }

    /// The checkpoint's own event, if still stored, must carry its link hash.
    fn check_checkpoint(
        &self,
        scope_id: &ScopeId,
        checkpoint: &Checkpoint,
        next_sequence: u64,
    ) -> LedgerResult<Option<VerificationOutcome>> {
        if next_sequence <= checkpoint.sequence {
            return Ok(Some(VerificationOutcome::ChainTruncated {
                sequence: next_sequence,
                found: None,
            }));
        }
        let stored = self.store.scan(scope_id, checkpoint.sequence, 1)?;
        match stored.first() {
            Some(event) if event.sequence == checkpoint.sequence && event.link_hash != checkpoint.link_hash => {
                Ok(Some(VerificationOutcome::LinkForged {
                    sequence: checkpoint.sequence,
                }))
            }
            _ => Ok(None),
        }
    }

    fn finish(&self, scope_id: &ScopeId, walk: &ChainWalk, outcome: VerificationOutcome) -> VerificationReport {
        match outcome.sequence() {
            None => info!(
                scope_id = %scope_id,
                events_checked = walk.checked(),
                last_link_hash = %walk.last_link_hash(),
                "chain verified"
            ),
            Some(sequence) => warn!(
                scope_id = %scope_id,
                sequence,
                finding = %outcome,
                "chain verification failed"
            ),
        }

        VerificationReport {
            scope_id: scope_id.clone(),
            verified_from: walk.start_sequence(),
            verified_through: walk.last_sequence(),
            events_checked: walk.checked(),
            last_link_hash: walk.last_link_hash(),
            outcome,
            verified_at: Utc::now(),
        }
    }
}
