//! Estate walkthrough
//!
//! Runs the ledger end to end against a fresh file store in a temporary
//! directory:
//!   1. `user-42` validates claim C-100 in `estate-7`; the head moves to sequence 0
//!   2. `user-42` approves the proof of claim; sequence 1 links to the first event
//!   3. A correction is recorded as a new event, never as an edit
//!   4. Background workers append to `estate-8` concurrently
//!   5. Every scope verifies; `estate-7` is exported and the bundle re-checked
//!   6. Tamper drill: a description is edited in the segment file on disk;
//!      after reopening, verification pinpoints the sequence and export is
//!      refused

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use serde_json::json;

use custos_config::LedgerConfig;
use custos_contracts::{
    error::{LedgerError, LedgerResult},
    event::ScopeId,
    verify::VerificationOutcome,
};
use custos_core::LedgerStore;
use custos_export::{BundleChecker, ExportService};
use custos_store::{FileLedgerStore, FileStoreOptions};
use custos_verify::IntegrityVerifier;

use crate::print_report;

pub fn run(config: &LedgerConfig) -> LedgerResult<ExitCode> {
    let dir = tempfile::Builder::new()
        .prefix("custos-scenario-")
        .tempdir()
        .map_err(|e| storage(format!("cannot create scenario directory: {e}")))?;
    let options = FileStoreOptions {
        sync_mode: config.storage.sync,
    };
    let store = Arc::new(FileLedgerStore::open(dir.path(), options.clone())?);
    let linker = config.chain_linker(store.clone());
    let verifier = IntegrityVerifier::new(store.clone()).with_batch_size(config.verify.batch_size);
    let estate = ScopeId::from("estate-7");
    let mut failures = 0;

    println!();
    println!("=== CUSTOS estate walkthrough ===");
    println!("  ledger directory: {}", dir.path().display());
    println!();

    // ── Steps 1-3: linked appends ─────────────────────────────────────────────
    let validated = linker.append_event(
        estate.clone(),
        "user-42",
        "claim.validate",
        "Validated claim C-100",
        json!({ "claim_id": "C-100", "result": "accepted" }),
    )?;
    let head = store.head(&estate)?;
    println!("  [1] claim.validate      sequence={} link={}", validated.sequence, validated.link_hash);
    println!("      head                ({:?}, {})", head.sequence, head.link_hash);

    let approved = linker.append_event(
        estate.clone(),
        "user-42",
        "document.approve",
        "Approved proof of claim",
        json!({ "document_id": "POC-100" }),
    )?;
    println!("  [2] document.approve    sequence={} previous={}", approved.sequence, approved.previous_link_hash);
    if approved.previous_link_hash != validated.link_hash {
        println!("      UNEXPECTED: sequence 1 does not link to sequence 0");
        failures += 1;
    }

    let correction = linker.append_correction(
        estate.clone(),
        "user-42",
        "claim.validate",
        validated.sequence,
        "Corrected claim C-100 amount",
        json!({ "amount": "1250.00" }),
    )?;
    println!(
        "  [3] correction          sequence={} corrects={}",
        correction.sequence, correction.payload["corrects_sequence"]
    );

    // ── Step 4: concurrent appenders ─────────────────────────────────────────
    let results: Vec<LedgerResult<()>> = thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let linker = &linker;
                s.spawn(move || -> LedgerResult<()> {
                    for i in 0..5 {
                        linker.append_event(
                            "estate-8",
                            "system",
                            "task.reconcile",
                            format!("Reconciled batch {worker}-{i}"),
                            json!({ "worker": worker, "batch": i }),
                        )?;
                    }
                    Ok(())
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|w| {
                w.join().unwrap_or_else(|_| {
                    Err(LedgerError::Storage {
                        reason: "append worker panicked".to_string(),
                    })
                })
            })
            .collect()
    });
    results.into_iter().collect::<LedgerResult<Vec<()>>>()?;
    println!("  [4] estate-8            head={:?}", store.head(&"estate-8".into())?.sequence);

    // ── Step 5: verify and export ─────────────────────────────────────────────
    println!();
    println!("  [5] verification");
    for scope_id in store.scopes()? {
        let report = verifier.verify_scope(&scope_id)?;
        if !report.is_valid() {
            failures += 1;
        }
        print_report(&report);
    }

    let bundle = ExportService::new(store.clone(), config.export.exporter_id.clone()).export_all(&estate)?;
    let text = serde_json::to_string(&bundle).map_err(|e| LedgerError::Encoding {
        reason: format!("failed to render bundle: {e}"),
    })?;
    let checked = BundleChecker::new()?.check_json(&text)?;
    println!(
        "      export {}..={} head={} independent check: {}",
        bundle.from_sequence, bundle.to_sequence, bundle.range_head_hash, checked.outcome
    );
    if !checked.is_valid() {
        failures += 1;
    }

    // ── Step 6: tamper drill ──────────────────────────────────────────────────
    println!();
    println!("  [6] tamper drill: editing the description of sequence 1 on disk");
    let segment = store.segment_path(&estate);
    drop(verifier);
    drop(linker);
    drop(store);
    let contents =
        fs::read_to_string(&segment).map_err(|e| storage(format!("cannot read '{}': {e}", segment.display())))?;
    fs::write(&segment, contents.replacen("Approved proof of claim", "Rejected proof of claim", 1))
        .map_err(|e| storage(format!("cannot write '{}': {e}", segment.display())))?;

    let store = Arc::new(FileLedgerStore::open(dir.path(), options)?);
    let report = IntegrityVerifier::new(store.clone())
        .with_batch_size(config.verify.batch_size)
        .verify_scope(&estate)?;
    print_report(&report);
    if report.outcome != (VerificationOutcome::ContentTampered { sequence: 1 }) {
        println!("      UNEXPECTED: tamper not pinpointed");
        failures += 1;
    }

    match ExportService::new(store, config.export.exporter_id.clone()).export_all(&estate) {
        Err(LedgerError::CannotExportInvalidChain { outcome, .. }) => {
            println!("      export refused: {outcome} (expected)");
        }
        Err(e) => return Err(e),
        Ok(_) => {
            println!("      UNEXPECTED: tampered chain was exported");
            failures += 1;
        }
    }

    println!();
    if failures == 0 {
        println!("Walkthrough completed: all checks behaved as expected.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Walkthrough completed with {failures} unexpected result(s).");
        Ok(ExitCode::FAILURE)
    }
}

fn storage(reason: String) -> LedgerError {
    LedgerError::Storage { reason }
}
