//! Error types for the CUSTOS ledger.
//!
//! All fallible ledger operations return `LedgerResult<T>`.  Verification
//! findings are not errors; they are reported through
//! `VerificationOutcome`, and only become an error when an export is refused.

use thiserror::Error;

use crate::{event::ScopeId, verify::VerificationOutcome};

/// The unified error type for the CUSTOS ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The event could not be canonically encoded (non-serializable, oversized,
    /// or missing a required field).  Nothing was hashed or committed.
    #[error("encoding error: {reason}")]
    Encoding { reason: String },

    /// The durable write failed or the scope's writer lock could not be
    /// acquired in time.  No partial state was left behind; safe to retry.
    #[error("commit failed for scope '{scope_id}': {reason}")]
    Commit { scope_id: ScopeId, reason: String },

    /// A requested sequence does not exist in the scope.
    #[error("sequence {sequence} not found in scope '{scope_id}'")]
    NotFound { scope_id: ScopeId, sequence: u64 },

    /// Storage could not be opened or read.
    #[error("storage error: {reason}")]
    Storage { reason: String },

    /// The caller cancelled the operation or its deadline elapsed.
    #[error("{operation} cancelled: {reason}")]
    Cancelled { operation: String, reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Export refused because the range does not verify.
    #[error("cannot export scope '{scope_id}': {outcome}")]
    CannotExportInvalidChain {
        scope_id: ScopeId,
        outcome: VerificationOutcome,
    },

    /// An export bundle failed structural or format checks.
    #[error("invalid export bundle: {reason}")]
    InvalidBundle { reason: String },
}

impl LedgerError {
    /// True for errors a caller may retry without changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Commit { .. } | Self::Cancelled { .. })
    }
}

/// Convenience alias used throughout the CUSTOS crates.
pub type LedgerResult<T> = Result<T, LedgerError>;
