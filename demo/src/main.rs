//! CUSTOS audit ledger: command-line front end.
//!
//! Appends, inspects, verifies and exports scopes of a ledger opened from a
//! TOML configuration (or `--data-dir` for a file-backed store), and runs a
//! self-contained walkthrough of the estate scenario.
//!
//! Usage:
//!   custos scenario
//!   custos --data-dir ./ledger append --scope estate-7 --actor user-42 \
//!       --action claim.validate --description "Validated claim C-100" \
//!       --payload '{"claim_id":"C-100","result":"accepted"}'
//!   custos --data-dir ./ledger verify --scope estate-7
//!   custos --data-dir ./ledger export --scope estate-7 --out bundle.json
//!   custos check-bundle bundle.json

mod scenario;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use custos_config::{LedgerConfig, StorageBackend};
use custos_contracts::{
    error::{LedgerError, LedgerResult},
    event::{Hash256, ScopeId},
    verify::VerificationReport,
};
use custos_core::LedgerStore;
use custos_export::{BundleChecker, ExportService};
use custos_verify::{Checkpoint, IntegrityVerifier, VerifyOptions};

/// Exit status when a chain or bundle does not verify.
const EXIT_INVALID: u8 = 2;

// ── CLI definition ────────────────────────────────────────────────────────────

/// CUSTOS: tamper-evident audit ledger.
#[derive(Parser)]
#[command(
    name = "custos",
    about = "Tamper-evident, hash-chained audit ledger",
    long_about = "Appends audit events to per-scope SHA-256 hash chains, verifies\n\
                  chain integrity and produces independently checkable export bundles."
)]
struct Cli {
    /// Ledger configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use a file-backed store in this directory, overriding `[storage]`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the estate walkthrough and a tamper drill against a temporary file-backed ledger.
    Scenario,
    /// Append one event and print it as JSON.
    Append {
        #[arg(long)]
        scope: String,
        #[arg(long, default_value = "system")]
        actor: String,
        /// Namespaced action tag, e.g. `claim.validate`.
        #[arg(long)]
        action: String,
        #[arg(long)]
        description: String,
        /// JSON payload.
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Print a scope's current head.
    Head {
        #[arg(long)]
        scope: String,
    },
    /// Verify one scope, or every scope when `--scope` is omitted.
    Verify {
        #[arg(long)]
        scope: Option<String>,
        /// Last sequence to verify; defaults to the head.
        #[arg(long)]
        through: Option<u64>,
        /// Trusted checkpoint sequence; verification starts after it.
        #[arg(long, requires = "after_link")]
        after_sequence: Option<u64>,
        /// Link hash of the trusted checkpoint.
        #[arg(long, requires = "after_sequence")]
        after_link: Option<Hash256>,
    },
    /// Export a verified range as a JSON bundle.
    Export {
        #[arg(long)]
        scope: String,
        #[arg(long, default_value_t = 0)]
        from: u64,
        /// Last sequence to export; defaults to the head.
        #[arg(long)]
        to: Option<u64>,
        /// Write the bundle here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check an export bundle file without access to the ledger.
    CheckBundle { path: PathBuf },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("custos: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> LedgerResult<ExitCode> {
    let config = load_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Command::Scenario => scenario::run(&config),
        Command::Append {
            scope,
            actor,
            action,
            description,
            payload,
        } => append(&config, scope, actor, action, description, &payload),
        Command::Head { scope } => {
            print_json(&open_store(&config)?.head(&ScopeId::from(scope))?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify {
            scope,
            through,
            after_sequence,
            after_link,
        } => {
            let checkpoint = match (after_sequence, after_link) {
                (Some(sequence), Some(link_hash)) => Some(Checkpoint { sequence, link_hash }),
                _ => None,
            };
            verify(&config, scope, through, checkpoint)
        }
        Command::Export { scope, from, to, out } => export(&config, scope, from, to, out.as_deref()),
        Command::CheckBundle { path } => check_bundle(&path),
    }
}

fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> LedgerResult<LedgerConfig> {
    let config = match path {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::default(),
    };
    Ok(match data_dir {
        Some(dir) => config.with_data_dir(dir),
        None => config,
    })
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn open_store(config: &LedgerConfig) -> LedgerResult<Arc<dyn LedgerStore>> {
    if config.storage.backend == StorageBackend::Memory {
        warn!("using the in-memory store; nothing will persist past this command");
    }
    config.open_store()
}

fn append(
    config: &LedgerConfig,
    scope: String,
    actor: String,
    action: String,
    description: String,
    payload: &str,
) -> LedgerResult<ExitCode> {
    let payload: serde_json::Value = serde_json::from_str(payload).map_err(|e| LedgerError::Encoding {
        reason: format!("--payload is not valid JSON: {e}"),
    })?;
    let event = config
        .chain_linker(open_store(config)?)
        .append_event(scope, actor, action, description, payload)?;
    print_json(&event)?;
    Ok(ExitCode::SUCCESS)
}

fn verify(
    config: &LedgerConfig,
    scope: Option<String>,
    through: Option<u64>,
    checkpoint: Option<Checkpoint>,
) -> LedgerResult<ExitCode> {
    let store = open_store(config)?;
    let verifier = IntegrityVerifier::new(store.clone()).with_batch_size(config.verify.batch_size);

    let mut options = VerifyOptions::default();
    if let Some(through) = through {
        options = options.through(through);
    }
    if let Some(checkpoint) = checkpoint {
        options = options.after(checkpoint);
    }

    let scopes = match scope {
        Some(scope) => vec![ScopeId::from(scope)],
        None => store.scopes()?,
    };
    let mut all_valid = true;
    for scope_id in &scopes {
        let report = verifier.verify(scope_id, &options)?;
        all_valid &= report.is_valid();
        print_report(&report);
    }
    Ok(exit_for(all_valid))
}

fn export(
    config: &LedgerConfig,
    scope: String,
    from: u64,
    to: Option<u64>,
    out: Option<&Path>,
) -> LedgerResult<ExitCode> {
    let scope_id = ScopeId::from(scope);
    let store = open_store(config)?;
    let to = match to {
        Some(to) => to,
        None => store.head(&scope_id)?.sequence.ok_or_else(|| LedgerError::NotFound {
            scope_id: scope_id.clone(),
            sequence: from,
        })?,
    };

    let bundle = ExportService::new(store, config.export.exporter_id.clone())
        .with_batch_size(config.verify.batch_size)
        .export(&scope_id, from, to)?;

    let text = to_pretty_json(&bundle)?;
    match out {
        Some(path) => {
            std::fs::write(path, text).map_err(|e| LedgerError::Storage {
                reason: format!("failed to write bundle '{}': {e}", path.display()),
            })?;
            println!(
                "exported {}..={} of '{}' to {} (head {})",
                bundle.from_sequence,
                bundle.to_sequence,
                bundle.scope_id,
                path.display(),
                bundle.range_head_hash
            );
        }
        None => println!("{text}"),
    }
    Ok(ExitCode::SUCCESS)
}

fn check_bundle(path: &Path) -> LedgerResult<ExitCode> {
    let text = std::fs::read_to_string(path).map_err(|e| LedgerError::Storage {
        reason: format!("failed to read bundle '{}': {e}", path.display()),
    })?;
    let checked = BundleChecker::new()?.check_json(&text)?;

    println!("  Chain:        {}", checked.outcome);
    println!("  Events:       {}", checked.events_checked);
    println!("  Recomputed:   {}", checked.recomputed_head);
    match checked.attestation_digest_matches {
        Some(true) => println!("  Attestation:  digest matches"),
        Some(false) => println!("  Attestation:  DIGEST MISMATCH"),
        None => println!("  Attestation:  none"),
    }
    Ok(exit_for(checked.is_valid()))
}

// ── Output helpers ────────────────────────────────────────────────────────────

pub(crate) fn print_report(report: &VerificationReport) {
    let range = match report.verified_through {
        Some(through) => format!("{}..={through}", report.verified_from),
        None => "empty".to_string(),
    };
    println!(
        "  {:<16} {:<40} events={:<6} range={range}",
        report.scope_id, report.outcome, report.events_checked
    );
}

fn print_json<T: serde::Serialize>(value: &T) -> LedgerResult<()> {
    println!("{}", to_pretty_json(value)?);
    Ok(())
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> LedgerResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| LedgerError::Encoding {
        reason: format!("failed to render JSON: {e}"),
    })
}

fn exit_for(valid: bool) -> ExitCode {
    if valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INVALID)
    }
}
