//! The chain linker: the only writer of audit events.
//!
//! Every append runs the same pipeline inside the scope's critical section:
//!
//!   Reserve sequence → Timestamp → Encode → Payload hash → Link hash → Commit
//!
//! The sequence is reserved before encoding because it participates in the
//! payload hash.  Because the critical section spans the whole pipeline, a
//! failed or cancelled append releases its reservation without leaving a gap.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use custos_contracts::{
    error::LedgerResult,
    event::{ActorId, AuditEvent, ChainHead, ScopeId},
};

use crate::{
    cancel::Cancellation,
    canonical::{CanonicalPayload, EncodingLimits, EventFields},
    hash,
    traits::{Clock, LedgerStore, SystemClock},
};

/// Default bound on waiting for a scope's writer lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// One request to record an action.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendRequest {
    pub scope_id: ScopeId,
    pub actor: ActorId,
    /// Namespaced action tag, e.g. `document.approve`.
    pub action_type: String,
    pub description: String,
    pub payload: Value,
}

impl AppendRequest {
    pub fn new(
        scope_id: impl Into<ScopeId>,
        actor: impl Into<ActorId>,
        action_type: impl Into<String>,
        description: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            scope_id: scope_id.into(),
            actor: actor.into(),
            action_type: action_type.into(),
            description: description.into(),
            payload,
        }
    }
}

/// Orchestrates appends over a `LedgerStore`.
///
/// The linker holds no chain state of its own; every append reads the head
/// from the store inside the scope's critical section.  Clone the `Arc`d
/// store into as many linkers as needed.
pub struct ChainLinker {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    limits: EncodingLimits,
    lock_timeout: Duration,
}

impl ChainLinker {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            limits: EncodingLimits::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_limits(mut self, limits: EncodingLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn limits(&self) -> &EncodingLimits {
        &self.limits
    }

    pub fn head(&self, scope_id: &ScopeId) -> LedgerResult<ChainHead> {
        self.store.head(scope_id)
    }

    /// Record one action and return the committed event.
    pub fn append_event(
        &self,
        scope_id: impl Into<ScopeId>,
        actor: impl Into<ActorId>,
        action_type: impl Into<String>,
        description: impl Into<String>,
        payload: Value,
    ) -> LedgerResult<AuditEvent> {
        self.append(
            AppendRequest::new(scope_id, actor, action_type, description, payload),
            &Cancellation::none(),
        )
    }

    /// Record one action, honouring the caller's cancellation.
    ///
    /// # Errors
    ///
    /// - `Encoding`: the request failed canonical encoding; nothing was locked.
    /// - `Commit`: the writer lock timed out or the durable write failed.
    /// - `Cancelled`: cancelled before commit; nothing was written.
    ///
    /// Not retried internally.  Retrying is safe: a new attempt simply
    /// receives the next free sequence.
    pub fn append(&self, request: AppendRequest, cancel: &Cancellation) -> LedgerResult<AuditEvent> {
        // Reject bad payloads before contending for the scope.
        let payload_bytes = CanonicalPayload::encode(&request.payload, &self.limits)?;
        cancel.check("append")?;

        let writer = self
            .store
            .begin_append(&request.scope_id, cancel.bound(self.lock_timeout))?;

        let head = writer.head();
        let sequence = writer.next_sequence();

        // occurred_at never runs backwards within a scope.
        let now = self.clock.now();
        let occurred_at = match head.occurred_at {
            Some(previous) if previous > now => previous,
            _ => now,
        };

        let fields = EventFields {
            scope_id: &request.scope_id,
            sequence,
            occurred_at: &occurred_at,
            actor: &request.actor,
            action_type: &request.action_type,
            description: &request.description,
        };
        let payload_hash = hash::payload_hash_with(&fields, &payload_bytes, &self.limits)?;
        let previous_link_hash = head.link_hash;
        let link_hash = hash::link_hash(&payload_hash, &previous_link_hash, sequence);

        debug!(
            scope_id = %request.scope_id,
            sequence,
            payload_hash = %payload_hash,
            "event linked"
        );

        // Last point at which cancelling leaves nothing behind.
        cancel.check("append")?;

        let event = AuditEvent {
            sequence,
            scope_id: request.scope_id,
            occurred_at,
            actor: request.actor,
            action_type: request.action_type,
            description: request.description,
            payload: request.payload,
            payload_hash,
            previous_link_hash,
            link_hash,
        };

        if let Err(e) = writer.commit(event.clone()) {
            warn!(scope_id = %event.scope_id, sequence, error = %e, "audit event commit failed");
            return Err(e);
        }

        info!(
            scope_id = %event.scope_id,
            sequence,
            action_type = %event.action_type,
            link_hash = %event.link_hash,
            "audit event committed"
        );
        Ok(event)
    }

    /// Record a correction of an earlier event.
    ///
    /// Committed events are never rewritten; a correction is a new event whose
    /// payload is `{"corrects_sequence": n, "correction": payload}`.  Fails
    /// with `NotFound` if `corrected_sequence` does not exist.
    pub fn append_correction(
        &self,
        scope_id: impl Into<ScopeId>,
        actor: impl Into<ActorId>,
        action_type: impl Into<String>,
        corrected_sequence: u64,
        description: impl Into<String>,
        payload: Value,
    ) -> LedgerResult<AuditEvent> {
        let scope_id = scope_id.into();
        self.store
            .read_range(&scope_id, corrected_sequence, corrected_sequence)?;

        let payload = json!({
            "corrects_sequence": corrected_sequence,
            "correction": payload,
        });
        self.append(
            AppendRequest::new(scope_id, actor, action_type, description, payload),
            &Cancellation::none(),
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    use custos_contracts::error::LedgerError;

    use super::*;
    use crate::{
        cancel::CancelHandle,
        canonical,
        gate::{GateGuard, WriterGate},
        hash::GENESIS_LINK_HASH,
        traits::ScopeWriter,
    };

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// A store that keeps events in a map and can be told to fail commits.
    #[derive(Default)]
    struct MockStore {
        events: Arc<Mutex<HashMap<ScopeId, Vec<AuditEvent>>>>,
        gate: Arc<WriterGate>,
        fail_commits: bool,
    }

    struct MockWriter {
        scope_id: ScopeId,
        head: ChainHead,
        events: Arc<Mutex<HashMap<ScopeId, Vec<AuditEvent>>>>,
        fail: bool,
        _guard: GateGuard,
    }

    impl ScopeWriter for MockWriter {
        fn scope_id(&self) -> &ScopeId {
            &self.scope_id
        }

        fn head(&self) -> ChainHead {
            self.head
        }

        fn commit(self: Box<Self>, event: AuditEvent) -> LedgerResult<()> {
            if self.fail {
                return Err(LedgerError::Commit {
                    scope_id: self.scope_id.clone(),
                    reason: "disk unavailable".to_string(),
                });
            }
            self.events
                .lock()
                .unwrap()
                .entry(self.scope_id.clone())
                .or_default()
                .push(event);
            Ok(())
        }
    }

    impl LedgerStore for MockStore {
        fn begin_append(&self, scope_id: &ScopeId, wait: Duration) -> LedgerResult<Box<dyn ScopeWriter + '_>> {
            let guard = self.gate.acquire(scope_id, wait)?;
            Ok(Box::new(MockWriter {
                scope_id: scope_id.clone(),
                head: self.head(scope_id)?,
                events: Arc::clone(&self.events),
                fail: self.fail_commits,
                _guard: guard,
            }))
        }

        fn read_range(&self, scope_id: &ScopeId, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>> {
            let events = self.events.lock().unwrap();
            let stored = events.get(scope_id).cloned().unwrap_or_default();
            (from..=to)
                .map(|s| {
                    stored.get(s as usize).cloned().ok_or(LedgerError::NotFound {
                        scope_id: scope_id.clone(),
                        sequence: s,
                    })
                })
                .collect()
        }

        fn head(&self, scope_id: &ScopeId) -> LedgerResult<ChainHead> {
            let events = self.events.lock().unwrap();
            Ok(events
                .get(scope_id)
                .and_then(|v| v.last())
                .map(ChainHead::of)
                .unwrap_or_default())
        }

        fn scan(&self, scope_id: &ScopeId, from: u64, limit: usize) -> LedgerResult<Vec<AuditEvent>> {
            let events = self.events.lock().unwrap();
            Ok(events
                .get(scope_id)
                .map(|v| v.iter().filter(|e| e.sequence >= from).take(limit).cloned().collect())
                .unwrap_or_default())
        }

        fn scopes(&self) -> LedgerResult<Vec<ScopeId>> {
            Ok(self.events.lock().unwrap().keys().cloned().collect())
        }
    }

    /// A clock frozen at a settable instant.
    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn at(t: DateTime<Utc>) -> Self {
            Self(Mutex::new(t))
        }

        fn set(&self, t: DateTime<Utc>) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn linker_over(store: MockStore) -> (ChainLinker, Arc<MockStore>) {
        let store = Arc::new(store);
        (ChainLinker::new(store.clone()), store)
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    /// The worked example: claim validation then document approval.
    #[test]
    fn test_estate_scenario_links_second_event_to_first() {
        let (linker, _store) = linker_over(MockStore::default());

        let first = linker
            .append_event(
                "estate-7",
                "user-42",
                "claim.validate",
                "Validated claim C-100",
                json!({ "claim_id": "C-100", "result": "accepted" }),
            )
            .unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.previous_link_hash, GENESIS_LINK_HASH);

        let head = linker.head(&ScopeId::from("estate-7")).unwrap();
        assert_eq!(head.sequence, Some(0));
        assert_eq!(head.link_hash, first.link_hash);

        let second = linker
            .append_event(
                "estate-7",
                "user-42",
                "document.approve",
                "Approved statement of affairs",
                json!({ "document_id": "D-9" }),
            )
            .unwrap();
        assert_eq!(second.sequence, 1);
        assert_eq!(second.previous_link_hash, first.link_hash);
    }

    /// Stored hashes are exactly what the hash engine recomputes.
    #[test]
    fn test_committed_hashes_recompute() {
        let (linker, _store) = linker_over(MockStore::default());
        let event = linker
            .append_event("estate-1", "system", "task.close", "Closed task T-3", json!({ "task": "T-3" }))
            .unwrap();

        let recomputed = hash::digest(&canonical::encode_stored(&event, linker.limits()).unwrap());
        assert_eq!(event.payload_hash, recomputed);
        assert_eq!(
            event.link_hash,
            hash::link_hash(&event.payload_hash, &event.previous_link_hash, event.sequence)
        );
    }

    /// Scopes are independent chains, each starting at genesis.
    #[test]
    fn test_scopes_have_independent_sequences() {
        let (linker, _store) = linker_over(MockStore::default());
        linker.append_event("estate-a", "u1", "claim.validate", "a0", Value::Null).unwrap();
        linker.append_event("estate-a", "u1", "claim.validate", "a1", Value::Null).unwrap();
        let b0 = linker.append_event("estate-b", "u1", "claim.validate", "b0", Value::Null).unwrap();

        assert_eq!(b0.sequence, 0);
        assert_eq!(b0.previous_link_hash, GENESIS_LINK_HASH);
    }

    /// A payload over the limit is rejected before anything is locked or written.
    #[test]
    fn test_encoding_error_leaves_scope_untouched() {
        let store = Arc::new(MockStore::default());
        let linker = ChainLinker::new(store.clone()).with_limits(EncodingLimits {
            max_payload_bytes: 8,
            ..EncodingLimits::default()
        });

        let err = linker
            .append_event("estate-1", "u1", "document.edit", "big", json!({ "body": "x".repeat(100) }))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Encoding { .. }));
        assert!(store.head(&ScopeId::from("estate-1")).unwrap().is_genesis());
        assert!(!store.gate.is_held());
    }

    /// A failed commit surfaces as CommitError and the retry gets the same sequence.
    #[test]
    fn test_commit_failure_releases_reservation() {
        let failing = MockStore {
            fail_commits: true,
            ..MockStore::default()
        };
        let events = Arc::clone(&failing.events);
        let (linker, _store) = linker_over(failing);

        let err = linker
            .append_event("estate-1", "u1", "claim.validate", "first try", Value::Null)
            .unwrap_err();
        assert!(err.is_retryable());

        // Same backing events, a healthy store.
        let healthy = MockStore {
            events,
            ..MockStore::default()
        };
        let (linker, _store) = linker_over(healthy);
        let event = linker
            .append_event("estate-1", "u1", "claim.validate", "second try", Value::Null)
            .unwrap();
        assert_eq!(event.sequence, 0);
    }

    /// A cancelled append writes nothing.
    #[test]
    fn test_cancelled_append_commits_nothing() {
        let (linker, store) = linker_over(MockStore::default());
        let handle = CancelHandle::new();
        handle.cancel();

        let err = linker
            .append(
                AppendRequest::new("estate-1", "u1", "claim.validate", "never", Value::Null),
                &Cancellation::none().handle(handle),
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled { .. }));
        assert!(store.head(&ScopeId::from("estate-1")).unwrap().is_genesis());
    }

    /// Contention past the lock timeout is a retryable CommitError.
    #[test]
    fn test_lock_timeout_is_commit_error() {
        let store = Arc::new(MockStore::default());
        let linker = ChainLinker::new(store.clone()).with_lock_timeout(Duration::from_millis(20));

        let _held = store.gate.acquire(&ScopeId::from("estate-1"), Duration::from_millis(10)).unwrap();
        let err = linker
            .append_event("estate-1", "u1", "claim.validate", "blocked", Value::Null)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Commit { .. }));
    }

    /// occurred_at is assigned by the ledger and never moves backwards.
    #[test]
    fn test_timestamps_never_run_backwards() {
        let t1 = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::at(t1));
        let store = Arc::new(MockStore::default());
        let linker = ChainLinker::new(store).with_clock(clock.clone());

        let first = linker.append_event("estate-1", "u1", "a.b", "first", Value::Null).unwrap();
        assert_eq!(first.occurred_at, t1);

        clock.set(t1 - chrono::Duration::hours(1));
        let second = linker.append_event("estate-1", "u1", "a.b", "second", Value::Null).unwrap();
        assert_eq!(second.occurred_at, t1);
    }

    /// Corrections reference an existing event and never touch it.
    #[test]
    fn test_correction_references_earlier_event() {
        let (linker, store) = linker_over(MockStore::default());
        let original = linker
            .append_event("estate-1", "u1", "claim.validate", "amount 100", json!({ "amount": 100 }))
            .unwrap();

        let correction = linker
            .append_correction("estate-1", "u1", "claim.correct", 0, "amount is 110", json!({ "amount": 110 }))
            .unwrap();
        assert_eq!(correction.sequence, 1);
        assert_eq!(correction.payload["corrects_sequence"], 0);
        assert_eq!(correction.payload["correction"]["amount"], 110);

        let stored = store.read_range(&ScopeId::from("estate-1"), 0, 0).unwrap();
        assert_eq!(stored[0], original);

        let err = linker
            .append_correction("estate-1", "u1", "claim.correct", 7, "missing", Value::Null)
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { sequence: 7, .. }));
    }
}
