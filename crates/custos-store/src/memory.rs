//! In-memory implementation of `LedgerStore`.
//!
//! `InMemoryLedgerStore` is the reference implementation of the store
//! contract.  Each scope gets its own `ScopeLog` (writer gate plus event
//! list), so appends to different scopes never contend.  Nothing survives
//! the process; use `FileLedgerStore` when durability matters.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::debug;

use custos_contracts::{
    error::{LedgerError, LedgerResult},
    event::{AuditEvent, ChainHead, ScopeId},
};
use custos_core::{gate::GateGuard, LedgerStore, ScopeWriter};

use crate::log::ScopeLog;

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    scopes: RwLock<HashMap<ScopeId, Arc<ScopeLog>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modify a scope's committed events in place, bypassing the chain.
    ///
    /// Only for simulating tampering or retention purges in tests.
    #[cfg(any(test, feature = "test-support"))]
    pub fn rewrite_committed(&self, scope_id: &ScopeId, f: impl FnOnce(&mut Vec<AuditEvent>)) -> LedgerResult<()> {
        self.log_or_create(scope_id)?.rewrite(f)
    }

    fn log(&self, scope_id: &ScopeId) -> LedgerResult<Option<Arc<ScopeLog>>> {
        let scopes = self.scopes.read().map_err(|_| poisoned())?;
        Ok(scopes.get(scope_id).cloned())
    }

    fn log_or_create(&self, scope_id: &ScopeId) -> LedgerResult<Arc<ScopeLog>> {
        if let Some(log) = self.log(scope_id)? {
            return Ok(log);
        }
        let mut scopes = self.scopes.write().map_err(|_| poisoned())?;
        let log = scopes
            .entry(scope_id.clone())
            .or_insert_with(|| {
                debug!(scope_id = %scope_id, "scope created");
                Arc::new(ScopeLog::new(scope_id.clone()))
            });
        Ok(Arc::clone(log))
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn begin_append(&self, scope_id: &ScopeId, wait: Duration) -> LedgerResult<Box<dyn ScopeWriter + '_>> {
        let log = self.log_or_create(scope_id)?;
        let guard = log.gate.acquire(scope_id, wait)?;
        let head = log.head()?;
        Ok(Box::new(MemoryWriter {
            log,
            head,
            _guard: guard,
        }))
    }

    fn read_range(&self, scope_id: &ScopeId, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>> {
        match self.log(scope_id)? {
            Some(log) => log.range(from, to),
            None => Err(LedgerError::NotFound {
                scope_id: scope_id.clone(),
                sequence: from,
            }),
        }
    }

    fn head(&self, scope_id: &ScopeId) -> LedgerResult<ChainHead> {
        match self.log(scope_id)? {
            Some(log) => log.head(),
            None => Ok(ChainHead::genesis()),
        }
    }

    fn scan(&self, scope_id: &ScopeId, from: u64, limit: usize) -> LedgerResult<Vec<AuditEvent>> {
        match self.log(scope_id)? {
            Some(log) => log.scan(from, limit),
            None => Ok(Vec::new()),
        }
    }

    fn scopes(&self) -> LedgerResult<Vec<ScopeId>> {
        let scopes = self.scopes.read().map_err(|_| poisoned())?;
        let mut ids = Vec::new();
        for (id, log) in scopes.iter() {
            if log.len()? > 0 {
                ids.push(id.clone());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

struct MemoryWriter {
    log: Arc<ScopeLog>,
    head: ChainHead,
    _guard: GateGuard,
}

impl ScopeWriter for MemoryWriter {
    fn scope_id(&self) -> &ScopeId {
        &self.log.scope_id
    }

    fn head(&self) -> ChainHead {
        self.head
    }

    fn commit(self: Box<Self>, event: AuditEvent) -> LedgerResult<()> {
        self.log.check_successor(&self.head, &event)?;
        self.log.publish(event)
    }
}

fn poisoned() -> LedgerError {
    LedgerError::Storage {
        reason: "scope map lock poisoned".to_string(),
    }
}
