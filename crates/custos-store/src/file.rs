//! Durable file-backed implementation of `LedgerStore`.
//!
//! One segment file per scope, named after the hex encoding of the scope id,
//! inside a single data directory.  Each committed event is one JSON line:
//!
//! ```text
//! <data_dir>/<hex(scope_id)>.ledger
//!   {"sequence":0,"scope_id":"estate-7",...}\n
//!   {"sequence":1,"scope_id":"estate-7",...}\n
//! ```
//!
//! Scope ids too long for a hex file name use `sha256-<digest>.ledger`
//! instead, and the id is taken from the records on open.
//!
//! A record is published to readers only after its line has been written and
//! (under `SyncMode::EveryWrite`) synced.  On open, a trailing line without
//! its newline is a torn write from a crash and is cut off; a complete line
//! that does not parse is corruption and fails the open.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use custos_contracts::{
    error::{LedgerError, LedgerResult},
    event::{AuditEvent, ChainHead, ScopeId},
};
use custos_core::{gate::GateGuard, hash, LedgerStore, ScopeWriter};

use crate::log::ScopeLog;

const SEGMENT_EXTENSION: &str = "ledger";

/// Longest hex stem used as a segment name; keeps names under 255 bytes.
const MAX_HEX_STEM: usize = 240;

const DIGEST_STEM_PREFIX: &str = "sha256-";

/// Flush/sync strategy for segment writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every committed event.
    #[default]
    EveryWrite,
    /// Flush to the OS only; a power loss may drop recent events.
    OsDefault,
}

#[derive(Debug, Clone, Default)]
pub struct FileStoreOptions {
    pub sync_mode: SyncMode,
}

/// Write side of a segment file.
pub(crate) trait SegmentIo: Send + fmt::Debug {
    /// Append `bytes` and flush them, syncing to disk when `sync` is set.
    fn append(&mut self, bytes: &[u8], sync: bool) -> io::Result<()>;

    /// Cut the file back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl SegmentIo for File {
    fn append(&mut self, bytes: &[u8], sync: bool) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()?;
        if sync {
            self.sync_data()?;
        }
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append-only segment file for one scope.
#[derive(Debug)]
struct Segment {
    path: PathBuf,
    file: Option<Box<dyn SegmentIo>>,
    /// Length of the committed prefix.
    len: u64,
}

#[derive(Debug)]
struct FileScope {
    log: ScopeLog,
    segment: Mutex<Segment>,
    /// Set when a failed write could not be rolled back.  The scope refuses
    /// appends until the store is reopened and recovery runs.
    poisoned: AtomicBool,
}

pub struct FileLedgerStore {
    dir: PathBuf,
    options: FileStoreOptions,
    scopes: RwLock<HashMap<ScopeId, Arc<FileScope>>>,
}

impl FileLedgerStore {
    /// Open (or create) a store rooted at `dir`, recovering every segment.
    pub fn open(dir: impl AsRef<Path>, options: FileStoreOptions) -> LedgerResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| storage(format!("cannot create '{}': {e}", dir.display())))?;

        let mut scopes = HashMap::new();
        let entries =
            fs::read_dir(&dir).map_err(|e| storage(format!("cannot list '{}': {e}", dir.display())))?;
        for entry in entries {
            let path = entry.map_err(|e| storage(e.to_string()))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXTENSION) {
                continue;
            }
            let named = scope_from_path(&path);
            if named.is_none() && !is_digest_named(&path) {
                warn!(path = %path.display(), "ignoring segment with undecodable name");
                continue;
            }
            let (events, len) = recover_segment(&path)?;
            let scope_id = match named {
                Some(scope_id) => scope_id,
                None => match events.first() {
                    Some(first) if names_segment(&path, &first.scope_id) => first.scope_id.clone(),
                    Some(first) => {
                        return Err(storage(format!(
                            "segment '{}' holds records for scope '{}' whose segment name differs",
                            path.display(),
                            first.scope_id
                        )));
                    }
                    None => {
                        debug!(path = %path.display(), "skipping empty digest-named segment");
                        continue;
                    }
                },
            };
            debug!(scope_id = %scope_id, events = events.len(), "segment recovered");
            scopes.insert(
                scope_id.clone(),
                Arc::new(FileScope {
                    log: ScopeLog::with_events(scope_id, events),
                    segment: Mutex::new(Segment { path, file: None, len }),
                    poisoned: AtomicBool::new(false),
                }),
            );
        }

        info!(dir = %dir.display(), scopes = scopes.len(), "file ledger store opened");
        Ok(Self {
            dir,
            options,
            scopes: RwLock::new(scopes),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the segment holding `scope_id`.
    pub fn segment_path(&self, scope_id: &ScopeId) -> PathBuf {
        self.dir.join(segment_file_name(scope_id))
    }

    /// Swap the segment writer of `scope_id`, creating the scope if needed.
    #[cfg(test)]
    pub(crate) fn replace_segment_io(&self, scope_id: &ScopeId, io: Box<dyn SegmentIo>) -> LedgerResult<()> {
        let scope = self.scope_or_create(scope_id)?;
        let mut segment = scope
            .segment
            .lock()
            .map_err(|_| storage("segment lock poisoned".to_string()))?;
        segment.file = Some(io);
        Ok(())
    }

    fn scope(&self, scope_id: &ScopeId) -> LedgerResult<Option<Arc<FileScope>>> {
        let scopes = self.scopes.read().map_err(|_| poisoned_map())?;
        Ok(scopes.get(scope_id).cloned())
    }

    fn scope_or_create(&self, scope_id: &ScopeId) -> LedgerResult<Arc<FileScope>> {
        if let Some(scope) = self.scope(scope_id)? {
            return Ok(scope);
        }
        let mut scopes = self.scopes.write().map_err(|_| poisoned_map())?;
        let path = self.segment_path(scope_id);
        let scope = scopes.entry(scope_id.clone()).or_insert_with(|| {
            Arc::new(FileScope {
                log: ScopeLog::new(scope_id.clone()),
                segment: Mutex::new(Segment { path, file: None, len: 0 }),
                poisoned: AtomicBool::new(false),
            })
        });
        Ok(Arc::clone(scope))
    }
}

impl LedgerStore for FileLedgerStore {
    fn begin_append(&self, scope_id: &ScopeId, wait: Duration) -> LedgerResult<Box<dyn ScopeWriter + '_>> {
        let scope = self.scope_or_create(scope_id)?;
        let guard = scope.log.gate.acquire(scope_id, wait)?;
        if scope.poisoned.load(Ordering::SeqCst) {
            return Err(LedgerError::Commit {
                scope_id: scope_id.clone(),
                reason: "segment has an unrecovered partial write; reopen the store".to_string(),
            });
        }
        let head = scope.log.head()?;
        Ok(Box::new(FileWriter {
            scope,
            head,
            sync_mode: self.options.sync_mode,
            _guard: guard,
        }))
    }

    fn read_range(&self, scope_id: &ScopeId, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>> {
        match self.scope(scope_id)? {
            Some(scope) => scope.log.range(from, to),
            None => Err(LedgerError::NotFound {
                scope_id: scope_id.clone(),
                sequence: from,
            }),
        }
    }

    fn head(&self, scope_id: &ScopeId) -> LedgerResult<ChainHead> {
        match self.scope(scope_id)? {
            Some(scope) => scope.log.head(),
            None => Ok(ChainHead::genesis()),
        }
    }

    fn scan(&self, scope_id: &ScopeId, from: u64, limit: usize) -> LedgerResult<Vec<AuditEvent>> {
        match self.scope(scope_id)? {
            Some(scope) => scope.log.scan(from, limit),
            None => Ok(Vec::new()),
        }
    }

    fn scopes(&self) -> LedgerResult<Vec<ScopeId>> {
        let scopes = self.scopes.read().map_err(|_| poisoned_map())?;
        let mut ids = Vec::new();
        for (id, scope) in scopes.iter() {
            if scope.log.len()? > 0 {
                ids.push(id.clone());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

struct FileWriter {
    scope: Arc<FileScope>,
    head: ChainHead,
    sync_mode: SyncMode,
    _guard: GateGuard,
}

impl FileWriter {
    fn commit_error(&self, reason: String) -> LedgerError {
        LedgerError::Commit {
            scope_id: self.scope.log.scope_id.clone(),
            reason,
        }
    }
}

impl ScopeWriter for FileWriter {
    fn scope_id(&self) -> &ScopeId {
        &self.scope.log.scope_id
    }

    fn head(&self) -> ChainHead {
        self.head
    }

    fn commit(self: Box<Self>, event: AuditEvent) -> LedgerResult<()> {
        self.scope.log.check_successor(&self.head, &event)?;

        let mut line = serde_json::to_vec(&event)
            .map_err(|e| self.commit_error(format!("cannot serialize event: {e}")))?;
        line.push(b'\n');

        let mut segment = self
            .scope
            .segment
            .lock()
            .map_err(|_| self.commit_error("segment lock poisoned".to_string()))?;

        if segment.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&segment.path)
                .map_err(|e| self.commit_error(format!("cannot open segment: {e}")))?;
            segment.file = Some(Box::new(file));
        }
        let committed_len = segment.len;
        let sync = self.sync_mode == SyncMode::EveryWrite;
        let Some(file) = segment.file.as_mut() else {
            return Err(self.commit_error("segment file unavailable".to_string()));
        };

        if let Err(e) = file.append(&line, sync) {
            // Cut the file back to the last committed record.
            if let Err(rollback) = file.truncate(committed_len) {
                self.scope.poisoned.store(true, Ordering::SeqCst);
                warn!(
                    scope_id = %event.scope_id,
                    sequence = event.sequence,
                    error = %rollback,
                    "segment rollback failed; scope poisoned until reopen"
                );
            }
            return Err(self.commit_error(format!("segment write failed: {e}")));
        }

        segment.len = committed_len + line.len() as u64;
        drop(segment);

        debug!(scope_id = %event.scope_id, sequence = event.sequence, "segment append");
        self.scope.log.publish(event)
    }
}

/// Load every complete record of a segment and cut off a torn tail.
///
/// Returns the records and the length of the committed prefix.
fn recover_segment(path: &Path) -> LedgerResult<(Vec<AuditEvent>, u64)> {
    let bytes = fs::read(path).map_err(|e| storage(format!("cannot read '{}': {e}", path.display())))?;

    let mut events = Vec::new();
    let mut offset = 0usize;
    let mut line_no = 0usize;
    while offset < bytes.len() {
        let Some(newline) = bytes[offset..].iter().position(|b| *b == b'\n') else {
            warn!(
                path = %path.display(),
                offset,
                torn_bytes = bytes.len() - offset,
                "discarding torn trailing record"
            );
            break;
        };
        line_no += 1;
        let line = &bytes[offset..offset + newline];
        let event: AuditEvent = serde_json::from_slice(line).map_err(|e| {
            storage(format!(
                "corrupt record at line {line_no} of '{}': {e}",
                path.display()
            ))
        })?;
        events.push(event);
        offset += newline + 1;
    }

    let committed = offset as u64;
    if committed < bytes.len() as u64 {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| storage(format!("cannot open '{}': {e}", path.display())))?;
        file.set_len(committed)
            .and_then(|()| file.sync_all())
            .map_err(|e| storage(format!("cannot truncate '{}': {e}", path.display())))?;
    }
    Ok((events, committed))
}

fn segment_file_name(scope_id: &ScopeId) -> String {
    let stem = hex::encode(scope_id.as_str());
    if stem.len() <= MAX_HEX_STEM {
        format!("{stem}.{SEGMENT_EXTENSION}")
    } else {
        let digest = hash::digest(scope_id.as_str().as_bytes());
        format!("{DIGEST_STEM_PREFIX}{}.{SEGMENT_EXTENSION}", digest.to_hex())
    }
}

fn is_digest_named(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.starts_with(DIGEST_STEM_PREFIX))
}

fn names_segment(path: &Path, scope_id: &ScopeId) -> bool {
    path.file_name().and_then(|name| name.to_str()) == Some(segment_file_name(scope_id).as_str())
}

fn scope_from_path(path: &Path) -> Option<ScopeId> {
    let stem = path.file_stem()?.to_str()?;
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok().map(ScopeId)
}

fn storage(reason: String) -> LedgerError {
    LedgerError::Storage { reason }
}

fn poisoned_map() -> LedgerError {
    storage("scope map lock poisoned".to_string())
}
