//! Core trait definitions for the CUSTOS ledger.
//!
//! - `LedgerStore`: durable, append-only event storage per scope
//! - `ScopeWriter`: a scope's critical section, held for one append
//! - `Clock`      : the ledger's source of commit timestamps
//!
//! The chain linker is the only component that opens a `ScopeWriter`; no other
//! code path can move a scope's head.

use std::time::Duration;

use chrono::{DateTime, Utc};

use custos_contracts::{
    error::LedgerResult,
    event::{AuditEvent, ChainHead, ScopeId},
};

/// Append-only persistent sequence of events, one chain per scope.
///
/// Implementations must guarantee:
/// - at most one `ScopeWriter` exists per scope at any time;
/// - an event becomes visible to readers only after it is durably committed,
///   and then immediately;
/// - readers never wait on a scope's writer.
pub trait LedgerStore: Send + Sync {
    /// Enter the scope's critical section, waiting at most `wait`.
    ///
    /// Returns `LedgerError::Commit` if the writer lock cannot be acquired in
    /// time.  The returned writer reserves `head().next_sequence()`; dropping
    /// it without committing releases the reservation.
    fn begin_append(&self, scope_id: &ScopeId, wait: Duration) -> LedgerResult<Box<dyn ScopeWriter + '_>>;

    /// Read events `from..=to` in ascending order.
    ///
    /// Fails with `LedgerError::NotFound` naming the first requested sequence
    /// that is absent (not yet written, purged, or unknown scope).
    fn read_range(&self, scope_id: &ScopeId, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>>;

    /// The latest committed position, or genesis for an empty scope.
    fn head(&self, scope_id: &ScopeId) -> LedgerResult<ChainHead>;

    /// Read up to `limit` stored records in storage order, starting with the
    /// first record whose sequence is `>= from`.
    ///
    /// Unlike `read_range`, this never fails on gaps: it exposes exactly what
    /// is stored so the verifier can report truncation or reordering.
    fn scan(&self, scope_id: &ScopeId, from: u64, limit: usize) -> LedgerResult<Vec<AuditEvent>>;

    /// All scopes with at least one committed event.
    fn scopes(&self) -> LedgerResult<Vec<ScopeId>>;
}

/// Exclusive append access to one scope.
pub trait ScopeWriter: Send {
    fn scope_id(&self) -> &ScopeId;

    /// The committed head at the time the critical section was entered.
    fn head(&self) -> ChainHead;

    /// The sequence reserved for the event being appended.
    fn next_sequence(&self) -> u64 {
        self.head().next_sequence()
    }

    /// Durably persist `event`, then publish it to readers.
    ///
    /// The event must carry the reserved sequence and link to `head()`.  On
    /// error nothing is published and no partial record remains.
    fn commit(self: Box<Self>, event: AuditEvent) -> LedgerResult<()>;
}

/// Source of commit timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock UTC time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
