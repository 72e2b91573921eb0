//! Independent export bundle checker.
//!
//! Verification of a bundle needs nothing but the bundle itself:
//!
//! 1. **Structural**: the JSON document is validated against
//!    [`bundle_schema`] with the `jsonschema` crate.  Unknown fields are
//!    allowed so newer exporters stay readable.
//! 2. **Format**: `format_version`, `hash_algorithm` and `encoding` must be
//!    ones this checker implements.
//! 3. **Chain**: the events are walked from `anchor_link_hash`, must cover
//!    `from_sequence..=to_sequence` exactly, and must end at `range_head_hash`.
//! 4. **Attestation**: when present, its digest must match the bundle.
//!
//! Structural and format problems are `InvalidBundle` errors.  Chain findings
//! are reported as a `VerificationOutcome`, as for a live scope.

use serde_json::{json, Value};
use tracing::{debug, warn};

use custos_contracts::{
    error::{LedgerError, LedgerResult},
    event::Hash256,
    export::{ExportBundle, BUNDLE_FORMAT_VERSION, CANONICAL_ENCODING, HASH_ALGORITHM},
    verify::VerificationOutcome,
};
use custos_core::GENESIS_LINK_HASH;
use custos_verify::verify_chain;

use crate::service::bundle_digest;

/// JSON Schema (draft 2020-12) for `ExportBundle` documents.
pub fn bundle_schema() -> Value {
    let hash = json!({ "type": "string", "pattern": "^[0-9a-f]{64}$" });
    let sequence = json!({ "type": "integer", "minimum": 0 });
    let text = json!({ "type": "string", "minLength": 1 });

    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "CUSTOS export bundle",
        "type": "object",
        "required": [
            "format_version", "bundle_id", "scope_id", "from_sequence", "to_sequence",
            "anchor_link_hash", "events", "range_head_hash", "generated_at",
            "exporter_id", "hash_algorithm", "encoding"
        ],
        "properties": {
            "format_version": { "type": "integer", "minimum": 1 },
            "bundle_id": { "type": "string", "format": "uuid" },
            "scope_id": text,
            "from_sequence": sequence,
            "to_sequence": sequence,
            "anchor_link_hash": hash,
            "range_head_hash": hash,
            "generated_at": { "type": "string" },
            "exporter_id": { "type": "string" },
            "hash_algorithm": { "type": "string" },
            "encoding": { "type": "string" },
            "events": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": [
                        "sequence", "scope_id", "occurred_at", "actor", "action_type",
                        "description", "payload", "payload_hash", "previous_link_hash",
                        "link_hash"
                    ],
                    "properties": {
                        "sequence": sequence,
                        "scope_id": text,
                        "occurred_at": { "type": "string" },
                        "actor": text,
                        "action_type": text,
                        "description": { "type": "string" },
                        "payload_hash": hash,
                        "previous_link_hash": hash,
                        "link_hash": hash
                    }
                }
            },
            "attestation": {
                "type": "object",
                "required": ["attestor_id", "algorithm", "bundle_digest", "signature", "attested_at"],
                "properties": {
                    "attestor_id": { "type": "string" },
                    "algorithm": { "type": "string" },
                    "bundle_digest": hash,
                    "signature": { "type": "string" },
                    "attested_at": { "type": "string" }
                }
            }
        }
    })
}

/// Result of checking one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleVerification {
    pub outcome: VerificationOutcome,

    /// Link hash the walk ended on, or the anchor if it stopped immediately.
    pub recomputed_head: Hash256,

    pub events_checked: u64,

    /// `None` when the bundle carries no attestation.
    pub attestation_digest_matches: Option<bool>,
}

impl BundleVerification {
    pub fn is_valid(&self) -> bool {
        self.outcome.is_valid() && self.attestation_digest_matches != Some(false)
    }
}

/// Validates bundle documents against the schema and then the chain.
pub struct BundleChecker {
    validator: jsonschema::Validator,
}

impl BundleChecker {
    pub fn new() -> LedgerResult<Self> {
        let validator = jsonschema::validator_for(&bundle_schema()).map_err(|e| LedgerError::InvalidBundle {
            reason: format!("invalid bundle schema document: {e}"),
        })?;
        Ok(Self { validator })
    }

    /// Check a bundle given as JSON text.
    pub fn check_json(&self, text: &str) -> LedgerResult<BundleVerification> {
        let document: Value = serde_json::from_str(text).map_err(|e| LedgerError::InvalidBundle {
            reason: format!("bundle is not valid JSON: {e}"),
        })?;
        self.check_value(&document)
    }

    /// Check an already parsed bundle document.
    pub fn check_value(&self, document: &Value) -> LedgerResult<BundleVerification> {
        let violations: Vec<String> = self
            .validator
            .iter_errors(document)
            .map(|error| format!("at {}: {}", error.instance_path, error))
            .collect();
        if !violations.is_empty() {
            warn!(violations = violations.len(), "bundle failed schema validation");
            return Err(LedgerError::InvalidBundle {
                reason: format!("schema violation {}", violations.join("; ")),
            });
        }

        let bundle: ExportBundle = serde_json::from_value(document.clone()).map_err(|e| LedgerError::InvalidBundle {
            reason: format!("bundle does not deserialize: {e}"),
        })?;
        verify_bundle(&bundle)
    }
}

/// Recompute a bundle's chain and compare it to its declared head.
pub fn verify_bundle(bundle: &ExportBundle) -> LedgerResult<BundleVerification> {
    check_format(bundle)?;

    let from = bundle.from_sequence;
    let to = bundle.to_sequence;
    let expected_len = (to - from).saturating_add(1);
    if bundle.events.len() as u64 > expected_len {
        return Err(LedgerError::InvalidBundle {
            reason: format!(
                "bundle declares {expected_len} events for {from}..={to} but carries {}",
                bundle.events.len()
            ),
        });
    }

    let attestation_digest_matches = match &bundle.attestation {
        Some(attestation) => Some(attestation.bundle_digest == bundle_digest(bundle)?),
        None => None,
    };

    // A range starting at genesis has no trust gap: its anchor is fixed.
    if from == 0 && bundle.anchor_link_hash != GENESIS_LINK_HASH {
        return Ok(finish(
            bundle,
            VerificationOutcome::ChainBroken { sequence: 0 },
            bundle.anchor_link_hash,
            0,
            attestation_digest_matches,
        ));
    }

    let (mut outcome, walk) = verify_chain(&bundle.scope_id, &bundle.events, from, bundle.anchor_link_hash);
    if outcome.is_valid() {
        if walk.expected_sequence() <= to {
            outcome = VerificationOutcome::ChainTruncated {
                sequence: walk.expected_sequence(),
                found: None,
            };
        } else if walk.last_link_hash() != bundle.range_head_hash {
            outcome = VerificationOutcome::LinkForged { sequence: to };
        }
    }

    Ok(finish(
        bundle,
        outcome,
        walk.last_link_hash(),
        walk.checked(),
        attestation_digest_matches,
    ))
}

fn check_format(bundle: &ExportBundle) -> LedgerResult<()> {
    if bundle.format_version == 0 || bundle.format_version > BUNDLE_FORMAT_VERSION {
        return Err(LedgerError::InvalidBundle {
            reason: format!(
                "unsupported format_version {} (supported: 1..={BUNDLE_FORMAT_VERSION})",
                bundle.format_version
            ),
        });
    }
    if bundle.hash_algorithm != HASH_ALGORITHM {
        return Err(LedgerError::InvalidBundle {
            reason: format!("unsupported hash_algorithm '{}'", bundle.hash_algorithm),
        });
    }
    if bundle.encoding != CANONICAL_ENCODING {
        return Err(LedgerError::InvalidBundle {
            reason: format!("unsupported encoding '{}'", bundle.encoding),
        });
    }
    if bundle.from_sequence > bundle.to_sequence {
        return Err(LedgerError::InvalidBundle {
            reason: format!(
                "from_sequence {} is after to_sequence {}",
                bundle.from_sequence, bundle.to_sequence
            ),
        });
    }
    Ok(())
}

fn finish(
    bundle: &ExportBundle,
    outcome: VerificationOutcome,
    recomputed_head: Hash256,
    events_checked: u64,
    attestation_digest_matches: Option<bool>,
) -> BundleVerification {
    if outcome.is_valid() {
        debug!(bundle_id = %bundle.bundle_id, events_checked, "bundle chain verified");
    } else {
        warn!(bundle_id = %bundle.bundle_id, finding = %outcome, "bundle chain verification failed");
    }
    if attestation_digest_matches == Some(false) {
        warn!(bundle_id = %bundle.bundle_id, "bundle attestation digest mismatch");
    }

    BundleVerification {
        outcome,
        recomputed_head,
        events_checked,
        attestation_digest_matches,
    }
}
