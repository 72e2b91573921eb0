//! Published event list for one scope.
//!
//! Both stores keep a `ScopeLog` per scope.  The writer gate serializes
//! appenders; the `RwLock` around the event list is held only long enough to
//! clone a range or push one finished event, so readers never wait on an
//! append in progress.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use custos_contracts::{
    error::{LedgerError, LedgerResult},
    event::{AuditEvent, ChainHead, ScopeId},
};
use custos_core::gate::WriterGate;

#[derive(Debug)]
pub(crate) struct ScopeLog {
    pub(crate) scope_id: ScopeId,
    pub(crate) gate: Arc<WriterGate>,
    events: RwLock<Vec<AuditEvent>>,
}

impl ScopeLog {
    pub(crate) fn new(scope_id: ScopeId) -> Self {
        Self::with_events(scope_id, Vec::new())
    }

    pub(crate) fn with_events(scope_id: ScopeId, events: Vec<AuditEvent>) -> Self {
        Self {
            scope_id,
            gate: Arc::new(WriterGate::new()),
            events: RwLock::new(events),
        }
    }

    pub(crate) fn head(&self) -> LedgerResult<ChainHead> {
        Ok(self.read()?.last().map(ChainHead::of).unwrap_or_default())
    }

    pub(crate) fn len(&self) -> LedgerResult<usize> {
        Ok(self.read()?.len())
    }

    pub(crate) fn range(&self, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>> {
        if from > to {
            return Ok(Vec::new());
        }
        let events = self.read()?;
        let start = self.index_of(&events, from).ok_or_else(|| self.not_found(from))?;

        let mut out = Vec::new();
        for (offset, sequence) in (from..=to).enumerate() {
            match events.get(start + offset) {
                Some(event) if event.sequence == sequence => out.push(event.clone()),
                _ => return Err(self.not_found(sequence)),
            }
        }
        Ok(out)
    }

    pub(crate) fn scan(&self, from: u64, limit: usize) -> LedgerResult<Vec<AuditEvent>> {
        let events = self.read()?;
        let start = match self.index_of(&events, from) {
            Some(i) => i,
            None => match events.iter().position(|e| e.sequence >= from) {
                Some(i) => i,
                None => return Ok(Vec::new()),
            },
        };
        Ok(events.iter().skip(start).take(limit).cloned().collect())
    }

    /// Append a durably committed event.  Caller holds the writer gate.
    pub(crate) fn publish(&self, event: AuditEvent) -> LedgerResult<()> {
        self.write()?.push(event);
        Ok(())
    }

    /// Check that `event` is the successor of `head`.
    pub(crate) fn check_successor(&self, head: &ChainHead, event: &AuditEvent) -> LedgerResult<()> {
        if event.scope_id != self.scope_id
            || event.sequence != head.next_sequence()
            || event.previous_link_hash != head.link_hash
        {
            return Err(LedgerError::Commit {
                scope_id: self.scope_id.clone(),
                reason: format!(
                    "event {} does not extend head {:?}",
                    event.sequence, head.sequence
                ),
            });
        }
        Ok(())
    }

    #[cfg(any(test, feature = "test-support"))]
    pub(crate) fn rewrite(&self, f: impl FnOnce(&mut Vec<AuditEvent>)) -> LedgerResult<()> {
        let mut events = self.write()?;
        f(&mut events);
        Ok(())
    }

    /// Slot holding `sequence` when the list is contiguous from its first record.
    fn index_of(&self, events: &[AuditEvent], sequence: u64) -> Option<usize> {
        let first = events.first()?.sequence;
        let index = usize::try_from(sequence.checked_sub(first)?).ok()?;
        events
            .get(index)
            .filter(|e| e.sequence == sequence)
            .map(|_| index)
    }

    fn not_found(&self, sequence: u64) -> LedgerError {
        LedgerError::NotFound {
            scope_id: self.scope_id.clone(),
            sequence,
        }
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, Vec<AuditEvent>>> {
        self.events.read().map_err(|_| LedgerError::Storage {
            reason: format!("event list lock poisoned for scope '{}'", self.scope_id),
        })
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, Vec<AuditEvent>>> {
        self.events.write().map_err(|_| LedgerError::Storage {
            reason: format!("event list lock poisoned for scope '{}'", self.scope_id),
        })
    }
}
