//! Caller-controlled cancellation and deadlines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use custos_contracts::error::{LedgerError, LedgerResult};

/// A shareable flag the caller flips to cancel in-flight work.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadline and/or cancel flag attached to one ledger call.
///
/// Operations poll `check` only at points where stopping leaves no partial
/// state behind.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    deadline: Option<Instant>,
    handle: Option<CancelHandle>,
}

impl Cancellation {
    /// Never cancels.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::none().deadline(Instant::now() + timeout)
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn handle(mut self, handle: CancelHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// `wait` shortened to the remaining time, if that is smaller.
    pub fn bound(&self, wait: Duration) -> Duration {
        self.remaining().map_or(wait, |left| left.min(wait))
    }

    pub fn check(&self, operation: &str) -> LedgerResult<()> {
        if self.handle.as_ref().is_some_and(CancelHandle::is_cancelled) {
            return Err(LedgerError::Cancelled {
                operation: operation.to_string(),
                reason: "cancelled by caller".to_string(),
            });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(LedgerError::Cancelled {
                operation: operation.to_string(),
                reason: "deadline elapsed".to_string(),
            });
        }
        Ok(())
    }
}
