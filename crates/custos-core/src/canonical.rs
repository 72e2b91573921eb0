//! Canonical encoding of audit event content.
//!
//! The same logical event always encodes to the same bytes, and no two
//! distinguishable events share an encoding.  Every variable-length field is
//! length-prefixed; no delimiter byte is ever relied upon.
//!
//! Event layout (bytes, in order):
//!   1. `ENCODING_TAG`, length-prefixed
//!   2. scope_id, length-prefixed UTF-8
//!   3. sequence as 8-byte big-endian
//!   4. occurred_at as 8-byte big-endian signed seconds, then 4-byte big-endian nanos
//!   5. actor, length-prefixed UTF-8
//!   6. action_type, length-prefixed UTF-8
//!   7. description, length-prefixed UTF-8
//!   8. payload as a canonical JSON value (see below)
//!
//! Length prefixes are 4-byte big-endian.  JSON values start with a one-byte
//! type tag; strings and numbers are length-prefixed, arrays and objects carry
//! their element count, and object entries are emitted in byte order of their
//! keys so insertion order never matters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use custos_contracts::{
    error::{LedgerError, LedgerResult},
    event::{ActorId, AuditEvent, ScopeId},
};

/// Domain separator written at the start of every event encoding.
pub const ENCODING_TAG: &[u8] = b"custos-canonical-v1";

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_NUMBER: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_ARRAY: u8 = 0x05;
const TAG_OBJECT: u8 = 0x06;

/// Deepest payload nesting a new event may use.
///
/// An export bundle carries each payload three containers deep (bundle,
/// `events`, event), and serde_json refuses documents nested 128 levels or
/// more, so anything deeper could be committed but never re-checked.
pub const MAX_APPEND_PAYLOAD_DEPTH: usize = 124;

/// Bounds applied while encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingLimits {
    /// Maximum size of the payload's canonical encoding.
    pub max_payload_bytes: usize,
    /// Maximum UTF-8 length of `description`.
    pub max_description_bytes: usize,
    /// Maximum nesting of arrays and objects in the payload.
    pub max_payload_depth: usize,
}

impl EncodingLimits {
    /// Limits used when re-encoding already committed events.
    ///
    /// Sizes are unbounded so that tightening the configured limits never
    /// turns a previously valid event into a finding.  Depth stays bounded at
    /// serde_json's own recursion limit.
    pub fn for_verification() -> Self {
        Self {
            max_payload_bytes: usize::MAX,
            max_description_bytes: usize::MAX,
            max_payload_depth: 128,
        }
    }
}

impl Default for EncodingLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: 64 * 1024,
            max_description_bytes: 4 * 1024,
            max_payload_depth: 32,
        }
    }
}

/// The non-payload fields that participate in the payload hash.
#[derive(Debug, Clone, Copy)]
pub struct EventFields<'a> {
    pub scope_id: &'a ScopeId,
    pub sequence: u64,
    pub occurred_at: &'a DateTime<Utc>,
    pub actor: &'a ActorId,
    pub action_type: &'a str,
    pub description: &'a str,
}

impl<'a> EventFields<'a> {
    pub fn of(event: &'a AuditEvent) -> Self {
        Self {
            scope_id: &event.scope_id,
            sequence: event.sequence,
            occurred_at: &event.occurred_at,
            actor: &event.actor,
            action_type: &event.action_type,
            description: &event.description,
        }
    }
}

/// A payload that has already passed encoding and size checks.
///
/// Encoding the payload once up front lets the linker reject bad input before
/// it enters a scope's critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPayload(Vec<u8>);

impl CanonicalPayload {
    pub fn encode(payload: &Value, limits: &EncodingLimits) -> LedgerResult<Self> {
        let mut out = Vec::new();
        write_value(&mut out, payload, 0, limits.max_payload_depth)?;
        if out.len() > limits.max_payload_bytes {
            return Err(LedgerError::Encoding {
                reason: format!(
                    "payload encodes to {} bytes, exceeding the {} byte limit",
                    out.len(),
                    limits.max_payload_bytes
                ),
            });
        }
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Convert any serializable value into a ledger payload.
///
/// Fails with `LedgerError::Encoding` for values JSON cannot represent, such
/// as maps with non-string keys.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> LedgerResult<Value> {
    serde_json::to_value(value).map_err(|e| LedgerError::Encoding {
        reason: format!("payload is not serializable: {e}"),
    })
}

/// Canonically encode a complete event.
pub fn encode(fields: &EventFields<'_>, payload: &Value, limits: &EncodingLimits) -> LedgerResult<Vec<u8>> {
    let payload = CanonicalPayload::encode(payload, limits)?;
    encode_with_payload(fields, &payload, limits)
}

/// Canonically encode an already committed event's content fields.
pub fn encode_stored(event: &AuditEvent, limits: &EncodingLimits) -> LedgerResult<Vec<u8>> {
    encode(&EventFields::of(event), &event.payload, limits)
}

/// Canonically encode an event whose payload was encoded up front.
pub fn encode_with_payload(
    fields: &EventFields<'_>,
    payload: &CanonicalPayload,
    limits: &EncodingLimits,
) -> LedgerResult<Vec<u8>> {
    validate_fields(fields, limits)?;

    let mut out = Vec::with_capacity(
        64 + fields.scope_id.as_str().len()
            + fields.actor.as_str().len()
            + fields.action_type.len()
            + fields.description.len()
            + payload.len(),
    );
    write_bytes(&mut out, ENCODING_TAG)?;
    write_bytes(&mut out, fields.scope_id.as_str().as_bytes())?;
    out.extend_from_slice(&fields.sequence.to_be_bytes());
    out.extend_from_slice(&fields.occurred_at.timestamp().to_be_bytes());
    out.extend_from_slice(&fields.occurred_at.timestamp_subsec_nanos().to_be_bytes());
    write_bytes(&mut out, fields.actor.as_str().as_bytes())?;
    write_bytes(&mut out, fields.action_type.as_bytes())?;
    write_bytes(&mut out, fields.description.as_bytes())?;
    out.extend_from_slice(payload.as_bytes());
    Ok(out)
}

/// Canonically encode a bare JSON value with no size bound.
///
/// Used for digests over structures other than events, e.g. export bundles.
pub fn canonical_value_bytes(value: &Value) -> LedgerResult<Vec<u8>> {
    let mut out = Vec::new();
    write_value(&mut out, value, 0, EncodingLimits::for_verification().max_payload_depth)?;
    Ok(out)
}

fn validate_fields(fields: &EventFields<'_>, limits: &EncodingLimits) -> LedgerResult<()> {
    if fields.scope_id.as_str().is_empty() {
        return Err(encoding_error("scope_id must not be empty"));
    }
    if fields.actor.as_str().is_empty() {
        return Err(encoding_error("actor must not be empty"));
    }
    if fields.action_type.is_empty() {
        return Err(encoding_error("action_type must not be empty"));
    }
    if fields.description.len() > limits.max_description_bytes {
        return Err(LedgerError::Encoding {
            reason: format!(
                "description is {} bytes, exceeding the {} byte limit",
                fields.description.len(),
                limits.max_description_bytes
            ),
        });
    }
    Ok(())
}

fn encoding_error(reason: &str) -> LedgerError {
    LedgerError::Encoding {
        reason: reason.to_string(),
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) -> LedgerResult<()> {
    let len = u32::try_from(len).map_err(|_| LedgerError::Encoding {
        reason: format!("field length {len} does not fit a 32-bit prefix"),
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> LedgerResult<()> {
    write_len(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn write_value(out: &mut Vec<u8>, value: &Value, depth: usize, max_depth: usize) -> LedgerResult<()> {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Number(n) => {
            out.push(TAG_NUMBER);
            write_bytes(out, n.to_string().as_bytes())?;
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            write_bytes(out, s.as_bytes())?;
        }
        Value::Array(items) => {
            check_depth(depth, max_depth)?;
            out.push(TAG_ARRAY);
            write_len(out, items.len())?;
            for item in items {
                write_value(out, item, depth + 1, max_depth)?;
            }
        }
        Value::Object(map) => {
            check_depth(depth, max_depth)?;
            out.push(TAG_OBJECT);
            write_len(out, map.len())?;
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            for (key, item) in entries {
                write_bytes(out, key.as_bytes())?;
                write_value(out, item, depth + 1, max_depth)?;
            }
        }
    }
    Ok(())
}

fn check_depth(depth: usize, max_depth: usize) -> LedgerResult<()> {
    if depth >= max_depth {
        return Err(LedgerError::Encoding {
            reason: format!("payload nests deeper than {max_depth} levels"),
        });
    }
    Ok(())
}
