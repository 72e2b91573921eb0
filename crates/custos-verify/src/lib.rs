//! # custos-verify
//!
//! Hash-chain integrity verification for the CUSTOS audit ledger.
//!
//! ## Overview
//!
//! [`IntegrityVerifier`] walks a scope from genesis (or from a trusted
//! [`Checkpoint`]) and recomputes every payload hash and link hash.  It stops
//! at the first divergence and reports the lowest offending sequence; nothing
//! at or after a break is trusted, so there is no attempt to skip past it.
//!
//! [`verify_chain`] is the same walk over an in-memory slice, used by the
//! export bundle checker.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use custos_verify::IntegrityVerifier;
//!
//! let report = IntegrityVerifier::new(store.clone()).verify_scope(&"estate-7".into())?;
//! if !report.is_valid() {
//!     eprintln!("{} (sequence {:?})", report.outcome, report.outcome.sequence());
//! }
//! ```

pub mod chain;
pub mod verifier;

pub use chain::{verify_chain, ChainWalk};
pub use verifier::{Checkpoint, IntegrityVerifier, VerifyOptions};

// ── Tests ─────────────────────────────────────────────────────────────────────
