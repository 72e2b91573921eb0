//! Per-scope writer gate.
//!
//! A `WriterGate` is a single-holder lock with a bounded wait.  Stores keep
//! one gate per scope, so appends to one scope serialize while appends to
//! different scopes never touch the same gate.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use custos_contracts::{
    error::{LedgerError, LedgerResult},
    event::ScopeId,
};

#[derive(Debug, Default)]
pub struct WriterGate {
    busy: Mutex<bool>,
    released: Condvar,
}

impl WriterGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate, waiting at most `wait` for the current holder.
    ///
    /// Returns `LedgerError::Commit` on timeout.
    pub fn acquire(self: &Arc<Self>, scope_id: &ScopeId, wait: Duration) -> LedgerResult<GateGuard> {
        let busy = self.busy.lock().map_err(|_| poisoned(scope_id))?;
        let (mut busy, _) = self
            .released
            .wait_timeout_while(busy, wait, |busy| *busy)
            .map_err(|_| poisoned(scope_id))?;

        if *busy {
            return Err(LedgerError::Commit {
                scope_id: scope_id.clone(),
                reason: format!("writer lock not acquired within {} ms", wait.as_millis()),
            });
        }
        *busy = true;

        Ok(GateGuard {
            gate: Arc::clone(self),
        })
    }

    pub fn is_held(&self) -> bool {
        self.busy.lock().map(|b| *b).unwrap_or(true)
    }
}

/// Holding this guard means holding the scope's writer gate.
#[derive(Debug)]
pub struct GateGuard {
    gate: Arc<WriterGate>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        // The flag is only ever set or cleared, so a poisoned mutex still holds
        // a meaningful value.
        let mut busy = match self.gate.busy.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *busy = false;
        drop(busy);
        self.gate.released.notify_one();
    }
}

fn poisoned(scope_id: &ScopeId) -> LedgerError {
    LedgerError::Commit {
        scope_id: scope_id.clone(),
        reason: "writer gate lock poisoned".to_string(),
    }
}
