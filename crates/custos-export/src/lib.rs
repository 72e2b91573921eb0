//! # custos-export
//!
//! Compliance export bundles for the CUSTOS audit ledger.
//!
//! [`ExportService`] verifies a scope before handing out any of its events and
//! packages a range as a self-contained [`ExportBundle`].  [`BundleChecker`]
//! and [`verify_bundle`] let a third party re-check a bundle with no access to
//! the ledger.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use custos_export::{BundleChecker, ExportService};
//!
//! let bundle = ExportService::new(store, "custos-prod").export(&scope, 0, 41)?;
//! let text = serde_json::to_string_pretty(&bundle)?;
//! assert!(BundleChecker::new()?.check_json(&text)?.is_valid());
//! ```
//!
//! [`ExportBundle`]: custos_contracts::export::ExportBundle

pub mod checker;
pub mod service;

pub use checker::{bundle_schema, verify_bundle, BundleChecker, BundleVerification};
pub use service::{bundle_digest, Attestor, ExportService};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use custos_contracts::{
        error::{LedgerError, LedgerResult},
        event::{Hash256, ScopeId},
        export::{Attestation, ExportBundle},
        verify::VerificationOutcome,
    };
    use custos_core::{
        canonical::MAX_APPEND_PAYLOAD_DEPTH, hash, ChainLinker, EncodingLimits, LedgerStore, GENESIS_LINK_HASH,
    };
    use custos_store::InMemoryLedgerStore;

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn scope() -> ScopeId {
        ScopeId::from("estate-7")
    }

    fn ledger_with(n: u64) -> Arc<InMemoryLedgerStore> {
        let store = Arc::new(InMemoryLedgerStore::new());
        let linker = ChainLinker::new(store.clone());
        for i in 0..n {
            linker
                .append_event(
                    "estate-7",
                    "user-42",
                    "claim.validate",
                    format!("Validated claim C-{i}"),
                    json!({ "claim_id": format!("C-{i}"), "amounts": [i, i * 2] }),
                )
                .unwrap();
        }
        store
    }

    fn service(store: &Arc<InMemoryLedgerStore>) -> ExportService {
        ExportService::new(store.clone(), "custos-test")
    }

    /// Signs by hashing the digest with a fixed key prefix.
    struct FixedKeyAttestor;

    impl Attestor for FixedKeyAttestor {
        fn attest(&self, bundle_digest: &Hash256) -> LedgerResult<Attestation> {
            let mut message = b"test-key".to_vec();
            message.extend_from_slice(bundle_digest.as_bytes());
            Ok(Attestation {
                attestor_id: "notary-1".to_string(),
                algorithm: "test-sha256-prefix".to_string(),
                bundle_digest: *bundle_digest,
                signature: hash::digest(&message).to_hex(),
                attested_at: Utc::now(),
            })
        }
    }

    // ── Export ────────────────────────────────────────────────────────────────

    /// A full export recomputes to its declared head independently.
    #[test]
    fn test_full_export_reproduces_head() {
        let store = ledger_with(5);
        let head = store.head(&scope()).unwrap();
        let bundle = service(&store).export(&scope(), 0, 4).unwrap();

        assert_eq!(bundle.events.len(), 5);
        assert_eq!(bundle.anchor_link_hash, GENESIS_LINK_HASH);
        assert_eq!(bundle.range_head_hash, head.link_hash);
        assert_eq!(bundle.exporter_id, "custos-test");
        assert!(bundle.attestation.is_none());

        let checked = verify_bundle(&bundle).unwrap();
        assert!(checked.is_valid());
        assert_eq!(checked.recomputed_head, head.link_hash);
        assert_eq!(checked.events_checked, 5);
    }

    #[test]
    fn test_export_all_covers_head() {
        let store = ledger_with(3);
        let bundle = service(&store).export_all(&scope()).unwrap();
        assert_eq!((bundle.from_sequence, bundle.to_sequence), (0, 2));
    }

    #[test]
    fn test_export_all_of_empty_scope_is_not_found() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let err = service(&store).export_all(&scope()).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { sequence: 0, .. }));
    }

    /// A partial range is anchored on its predecessor's link.
    #[test]
    fn test_partial_range_is_anchored() {
        let store = ledger_with(6);
        let all = store.read_range(&scope(), 0, 5).unwrap();
        let bundle = service(&store).export(&scope(), 2, 4).unwrap();

        assert_eq!(bundle.anchor_link_hash, all[1].link_hash);
        assert_eq!(bundle.range_head_hash, all[4].link_hash);
        assert!(verify_bundle(&bundle).unwrap().is_valid());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let store = ledger_with(3);
        let err = service(&store).export(&scope(), 2, 1).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidBundle { .. }));
    }

    #[test]
    fn test_range_beyond_head_is_not_found() {
        let store = ledger_with(3);
        let err = service(&store).export(&scope(), 0, 7).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { sequence: 3, .. }));
    }

    /// A tampered chain is never exported, even when the tamper precedes the range.
    #[test]
    fn test_tampered_chain_refused() {
        let store = ledger_with(5);
        store
            .rewrite_committed(&scope(), |events| {
                events[1].description = "Rejected claim C-1".to_string();
            })
            .unwrap();

        let err = service(&store).export(&scope(), 3, 4).unwrap_err();
        match err {
            LedgerError::CannotExportInvalidChain { scope_id, outcome } => {
                assert_eq!(scope_id, scope());
                assert_eq!(outcome, VerificationOutcome::ContentTampered { sequence: 1 });
            }
            other => panic!("expected CannotExportInvalidChain, got {other:?}"),
        }
    }

    // ── Bundle checking ───────────────────────────────────────────────────────

    /// A bundle survives JSON serialization and passes the schema.
    #[test]
    fn test_bundle_json_checks_clean() {
        let store = ledger_with(4);
        let bundle = service(&store).export(&scope(), 0, 3).unwrap();
        let text = serde_json::to_string_pretty(&bundle).unwrap();

        let checked = BundleChecker::new().unwrap().check_json(&text).unwrap();
        assert!(checked.is_valid());
        assert_eq!(checked.recomputed_head, bundle.range_head_hash);
    }

    /// Float payloads re-parse to the values that were hashed.
    #[test]
    fn test_float_payload_bundle_checks_clean() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let linker = ChainLinker::new(store.clone());
        for amount in [1.0715660391465826e-75, 0.1 + 0.2, 5e-324] {
            linker
                .append_event("estate-7", "user-42", "claim.adjust", "Adjusted claim C-100", json!({ "amount": amount }))
                .unwrap();
        }
        let bundle = service(&store)
            .with_attestor(Arc::new(FixedKeyAttestor))
            .export_all(&scope())
            .unwrap();
        let text = serde_json::to_string(&bundle).unwrap();

        let checked = BundleChecker::new().unwrap().check_json(&text).unwrap();
        assert_eq!(checked.outcome, VerificationOutcome::Valid);
        assert_eq!(checked.attestation_digest_matches, Some(true));
    }

    /// The deepest payload a linker may accept still fits a bundle document.
    #[test]
    fn test_deepest_payload_bundle_checks_clean() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let linker = ChainLinker::new(store.clone()).with_limits(EncodingLimits {
            max_payload_depth: MAX_APPEND_PAYLOAD_DEPTH,
            ..EncodingLimits::default()
        });
        let mut payload = json!({ "claim_id": "C-100" });
        for _ in 1..MAX_APPEND_PAYLOAD_DEPTH {
            payload = json!([payload]);
        }
        linker
            .append_event("estate-7", "user-42", "claim.validate", "Nested claim", payload)
            .unwrap();

        let text = serde_json::to_string(&service(&store).export_all(&scope()).unwrap()).unwrap();
        assert!(BundleChecker::new().unwrap().check_json(&text).unwrap().is_valid());
    }

    /// Fields added by a newer exporter are ignored.
    #[test]
    fn test_unknown_fields_tolerated() {
        let store = ledger_with(2);
        let bundle = service(&store).export(&scope(), 0, 1).unwrap();
        let mut document = serde_json::to_value(&bundle).unwrap();
        document["retention_policy"] = json!("7y");

        let checked = BundleChecker::new().unwrap().check_value(&document).unwrap();
        assert!(checked.is_valid());
    }

    #[test]
    fn test_schema_violation_rejected() {
        let store = ledger_with(2);
        let bundle = service(&store).export(&scope(), 0, 1).unwrap();
        let mut document = serde_json::to_value(&bundle).unwrap();
        document["range_head_hash"] = json!("not-a-hash");
        document.as_object_mut().unwrap().remove("events");

        let err = BundleChecker::new().unwrap().check_value(&document).unwrap_err();
        let LedgerError::InvalidBundle { reason } = err else {
            panic!("expected InvalidBundle");
        };
        assert!(reason.contains("range_head_hash"), "{reason}");
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let store = ledger_with(2);
        let mut bundle = service(&store).export(&scope(), 0, 1).unwrap();
        bundle.format_version = 2;
        let err = verify_bundle(&bundle).unwrap_err();
        assert!(err.to_string().contains("unsupported format_version 2"));
    }

    #[test]
    fn test_edited_bundle_event_detected() {
        let store = ledger_with(3);
        let mut bundle = service(&store).export(&scope(), 0, 2).unwrap();
        bundle.events[2].payload["claim_id"] = json!("C-X");

        let checked = verify_bundle(&bundle).unwrap();
        assert_eq!(checked.outcome, VerificationOutcome::ContentTampered { sequence: 2 });
    }

    /// Dropping the last event is caught against the declared range.
    #[test]
    fn test_short_bundle_is_truncated() {
        let store = ledger_with(3);
        let mut bundle = service(&store).export(&scope(), 0, 2).unwrap();
        bundle.events.pop();

        let checked = verify_bundle(&bundle).unwrap();
        assert_eq!(
            checked.outcome,
            VerificationOutcome::ChainTruncated { sequence: 2, found: None }
        );
    }

    #[test]
    fn test_wrong_declared_head_is_forged() {
        let store = ledger_with(3);
        let mut bundle = service(&store).export(&scope(), 0, 2).unwrap();
        bundle.range_head_hash = Hash256([1; 32]);

        let checked = verify_bundle(&bundle).unwrap();
        assert_eq!(checked.outcome, VerificationOutcome::LinkForged { sequence: 2 });
    }

    #[test]
    fn test_genesis_range_with_foreign_anchor_is_broken() {
        let store = ledger_with(2);
        let mut bundle = service(&store).export(&scope(), 0, 1).unwrap();
        bundle.anchor_link_hash = Hash256([3; 32]);

        let checked = verify_bundle(&bundle).unwrap();
        assert_eq!(checked.outcome, VerificationOutcome::ChainBroken { sequence: 0 });
    }

    // ── Attestation ───────────────────────────────────────────────────────────

    /// The attestor signs the digest of the unsigned bundle.
    #[test]
    fn test_attested_bundle_digest_matches() {
        let store = ledger_with(3);
        let bundle = service(&store)
            .with_attestor(Arc::new(FixedKeyAttestor))
            .export(&scope(), 0, 2)
            .unwrap();

        let attestation = bundle.attestation.clone().unwrap();
        assert_eq!(attestation.bundle_digest, bundle_digest(&bundle).unwrap());

        let text = serde_json::to_string(&bundle).unwrap();
        let checked = BundleChecker::new().unwrap().check_json(&text).unwrap();
        assert_eq!(checked.attestation_digest_matches, Some(true));
        assert!(checked.is_valid());
    }

    /// Changing bundle metadata after signing breaks the attestation.
    #[test]
    fn test_attestation_mismatch_invalidates() {
        let store = ledger_with(2);
        let mut bundle: ExportBundle = service(&store)
            .with_attestor(Arc::new(FixedKeyAttestor))
            .export(&scope(), 0, 1)
            .unwrap();
        bundle.exporter_id = "someone-else".to_string();

        let checked = verify_bundle(&bundle).unwrap();
        assert!(checked.outcome.is_valid());
        assert_eq!(checked.attestation_digest_matches, Some(false));
        assert!(!checked.is_valid());
    }

    #[test]
    fn test_digest_ignores_attestation() {
        let store = ledger_with(1);
        let mut bundle = service(&store).export(&scope(), 0, 0).unwrap();
        let before = bundle_digest(&bundle).unwrap();
        bundle.attestation = Some(FixedKeyAttestor.attest(&before).unwrap());
        assert_eq!(bundle_digest(&bundle).unwrap(), before);
    }
}
