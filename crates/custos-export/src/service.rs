//! Export/Attestation Service.
//!
//! `ExportService` produces an `ExportBundle` only for ranges whose chain
//! verifies from genesis.  A broken chain is never exported in a form that
//! could be mistaken for a valid one.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use custos_contracts::{
    error::{LedgerError, LedgerResult},
    event::{Hash256, ScopeId},
    export::{Attestation, ExportBundle, BUNDLE_FORMAT_VERSION, CANONICAL_ENCODING, HASH_ALGORITHM},
    verify::VerificationOutcome,
};
use custos_core::{canonical, hash, Clock, LedgerStore, SystemClock};
use custos_verify::{verify_chain, IntegrityVerifier, VerifyOptions};

/// An external signer over bundle digests.
///
/// The ledger only defines what is signed (`bundle_digest`); the scheme and
/// key management belong to the implementation.
pub trait Attestor: Send + Sync {
    fn attest(&self, bundle_digest: &Hash256) -> LedgerResult<Attestation>;
}

/// SHA-256 over the canonical encoding of `bundle` with its attestation removed.
pub fn bundle_digest(bundle: &ExportBundle) -> LedgerResult<Hash256> {
    let unsigned = ExportBundle {
        attestation: None,
        ..bundle.clone()
    };
    let value = serde_json::to_value(&unsigned).map_err(|e| LedgerError::Encoding {
        reason: format!("bundle is not serializable: {e}"),
    })?;
    Ok(hash::digest(&canonical::canonical_value_bytes(&value)?))
}

pub struct ExportService {
    store: Arc<dyn LedgerStore>,
    exporter_id: String,
    attestor: Option<Arc<dyn Attestor>>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl ExportService {
    /// Create a service that stamps bundles with `exporter_id`.
    pub fn new(store: Arc<dyn LedgerStore>, exporter_id: impl Into<String>) -> Self {
        Self {
            store,
            exporter_id: exporter_id.into(),
            attestor: None,
            clock: Arc::new(SystemClock),
            batch_size: custos_verify::verifier::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_attestor(mut self, attestor: Arc<dyn Attestor>) -> Self {
        self.attestor = Some(attestor);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Batch size for the pre-export verification walk.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn exporter_id(&self) -> &str {
        &self.exporter_id
    }

    /// Export events `from..=to` of one scope.
    ///
    /// # Errors
    ///
    /// - `InvalidBundle`: `from` is after `to`.
    /// - `NotFound`: `to` is beyond the scope's head.
    /// - `CannotExportInvalidChain`: `0..=to` does not verify; carries the finding.
    pub fn export(&self, scope_id: &ScopeId, from: u64, to: u64) -> LedgerResult<ExportBundle> {
        if from > to {
            return Err(LedgerError::InvalidBundle {
                reason: format!("from_sequence {from} is after to_sequence {to}"),
            });
        }

        let report = IntegrityVerifier::new(self.store.clone())
            .with_batch_size(self.batch_size)
            .verify(scope_id, &VerifyOptions::default().through(to))?;
        if !report.is_valid() {
            return Err(self.refuse(scope_id, report.outcome));
        }

        let events = self.store.read_range(scope_id, from, to)?;
        let Some(first) = events.first() else {
            return Err(LedgerError::NotFound {
                scope_id: scope_id.clone(),
                sequence: from,
            });
        };
        let anchor_link_hash = first.previous_link_hash;

        // The range must still match what was just verified.
        let (outcome, walk) = verify_chain(scope_id, &events, from, anchor_link_hash);
        if !outcome.is_valid() {
            return Err(self.refuse(scope_id, outcome));
        }
        let range_head_hash = walk.last_link_hash();
        if range_head_hash != report.last_link_hash {
            return Err(self.refuse(scope_id, VerificationOutcome::LinkForged { sequence: to }));
        }

        let mut bundle = ExportBundle {
            format_version: BUNDLE_FORMAT_VERSION,
            bundle_id: Uuid::new_v4(),
            scope_id: scope_id.clone(),
            from_sequence: from,
            to_sequence: to,
            anchor_link_hash,
            events,
            range_head_hash,
            generated_at: self.clock.now(),
            exporter_id: self.exporter_id.clone(),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            encoding: CANONICAL_ENCODING.to_string(),
            attestation: None,
        };

        if let Some(attestor) = &self.attestor {
            let digest = bundle_digest(&bundle)?;
            bundle.attestation = Some(attestor.attest(&digest)?);
        }

        info!(
            scope_id = %scope_id,
            bundle_id = %bundle.bundle_id,
            from_sequence = from,
            to_sequence = to,
            range_head_hash = %range_head_hash,
            attested = bundle.attestation.is_some(),
            "export bundle produced"
        );
        Ok(bundle)
    }

    /// Export a scope from genesis through its current head.
    pub fn export_all(&self, scope_id: &ScopeId) -> LedgerResult<ExportBundle> {
        let head = self.store.head(scope_id)?;
        let to = head.sequence.ok_or_else(|| LedgerError::NotFound {
            scope_id: scope_id.clone(),
            sequence: 0,
        })?;
        self.export(scope_id, 0, to)
    }

    fn refuse(&self, scope_id: &ScopeId, outcome: VerificationOutcome) -> LedgerError {
        warn!(scope_id = %scope_id, finding = %outcome, "export refused");
        LedgerError::CannotExportInvalidChain {
            scope_id: scope_id.clone(),
            outcome,
        }
    }
}
