// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`. Provides an
//! in-memory [`Storage`] with fault injection and the classic string-map
//! journallable the journal test suites are written against.

use crate::error::{JournalError, Result};
use crate::journal::{Journallable, Journalled};
use crate::op::Operation;
use crate::record::{read_record, ReadOutcome};
use crate::storage::{CheckpointHandler, CheckpointSink, RecordHandler, Storage, StorageState};
use crate::types::{Generation, Magic, OpVersion, Opcode, Opdesc, NOGEN};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

// ── In-memory storage ───────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    fail_append: bool,
    fail_checkpoint_write: bool,
    fail_commit: bool,
}

#[derive(Debug)]
struct Pending {
    generation: Generation,
    payload: Vec<u8>,
    /// Records tentatively appended to the next generation.
    log: Vec<u8>,
}

#[derive(Debug)]
struct MemInner {
    state: StorageState,
    user_magic: Magic,
    generation: Generation,
    /// Committed snapshot payload; `None` until the first commit.
    checkpoint: Option<Vec<u8>>,
    /// Raw framed records of the committed generation.
    log: Vec<u8>,
    /// Replay cursor into `log`.
    read_pos: usize,
    pending: Option<Pending>,
    faults: Faults,
}

/// Fully in-memory [`Storage`] used by unit tests.
///
/// Holds real framed bytes, so the record codec — including torn-tail and
/// corruption handling — is exercised exactly as on disk. Fault switches
/// allow injecting I/O failures at the append, stream and commit points.
///
/// Clones share the same storage, so a test can hand one clone to a
/// [`crate::Port`] and keep another for inspection and crash simulation.
#[derive(Clone)]
pub struct MemStorage {
    inner: Arc<Mutex<MemInner>>,
}

impl MemStorage {
    /// An already-initialized empty journal: an empty committed checkpoint
    /// of generation 1 and no records, open for reading and writing.
    pub fn new() -> Self {
        MemStorage {
            inner: Arc::new(Mutex::new(MemInner {
                state: StorageState::Readable,
                user_magic: Magic::ZERO,
                generation: 1,
                checkpoint: Some(Vec::new()),
                log: Vec::new(),
                read_pos: 0,
                pending: None,
                faults: Faults::default(),
            })),
        }
    }

    /// A fresh storage created for writing: no checkpoint, no records.
    pub fn created() -> Self {
        let storage = MemStorage::new();
        {
            let mut inner = storage.inner.lock();
            inner.state = StorageState::Created;
            inner.generation = NOGEN;
            inner.checkpoint = None;
        }
        storage
    }

    /// Copy the *committed* contents into a fresh storage, as a crash and
    /// reopen would see them. Anything under construction is lost.
    pub fn reopen(&self) -> MemStorage {
        let inner = self.inner.lock();
        MemStorage {
            inner: Arc::new(Mutex::new(MemInner {
                state: StorageState::Readable,
                user_magic: inner.user_magic,
                generation: inner.generation,
                checkpoint: inner.checkpoint.clone(),
                log: inner.log.clone(),
                read_pos: 0,
                pending: None,
                faults: Faults::default(),
            })),
        }
    }

    /// Like [`reopen`](MemStorage::reopen), but read-only.
    pub fn reopen_readonly(&self) -> MemStorage {
        let storage = self.reopen();
        storage.inner.lock().state = StorageState::Readonly;
        storage
    }

    /// Chop `n` bytes off the end of the committed record log, simulating
    /// a torn trailing write.
    pub fn truncate_tail(&self, n: usize) {
        let mut inner = self.inner.lock();
        let len = inner.log.len().saturating_sub(n);
        inner.log.truncate(len);
    }

    /// Flip one byte of the committed record log.
    pub fn corrupt_byte(&self, offset: usize) {
        let mut inner = self.inner.lock();
        inner.log[offset] ^= 0xff;
    }

    /// Size of the committed record log in bytes.
    pub fn log_len(&self) -> usize {
        self.inner.lock().log.len()
    }

    /// The committed snapshot payload, if any checkpoint was committed.
    pub fn committed_checkpoint(&self) -> Option<Vec<u8>> {
        self.inner.lock().checkpoint.clone()
    }

    pub fn fail_append(&self, fail: bool) {
        self.inner.lock().faults.fail_append = fail;
    }

    pub fn fail_checkpoint_write(&self, fail: bool) {
        self.inner.lock().faults.fail_checkpoint_write = fail;
    }

    pub fn fail_commit(&self, fail: bool) {
        self.inner.lock().faults.fail_commit = fail;
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        MemStorage::new()
    }
}

fn injected() -> JournalError {
    JournalError::Io(io::Error::other("injected failure"))
}

impl Storage for MemStorage {
    fn state(&self) -> StorageState {
        self.inner.lock().state
    }

    fn generation(&self) -> Generation {
        self.inner.lock().generation
    }

    fn user_magic(&self) -> Magic {
        self.inner.lock().user_magic
    }

    fn set_user_magic(&self, magic: Magic) -> Result<()> {
        self.inner.lock().user_magic = magic;
        Ok(())
    }

    fn make_writable(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            StorageState::Created | StorageState::Readable => {
                inner.state = StorageState::Writable;
                Ok(())
            }
            state => Err(JournalError::state("make_writable", state)),
        }
    }

    fn replay_checkpoint(&self, handler: CheckpointHandler<'_>) -> Result<()> {
        let payload = {
            let inner = self.inner.lock();
            if !inner.state.is_readable() {
                return Err(JournalError::state("replay_checkpoint", inner.state));
            }
            inner
                .checkpoint
                .clone()
                .ok_or_else(|| JournalError::corrupted("no committed checkpoint"))?
        };
        let size = payload.len() as u64;
        handler(&mut Cursor::new(payload), size)
    }

    fn replay_record(&self, handler: RecordHandler<'_>) -> Result<bool> {
        let (outcome, pos) = {
            let inner = self.inner.lock();
            if !inner.state.is_readable() {
                return Err(JournalError::state("replay_record", inner.state));
            }
            let mut cursor = Cursor::new(&inner.log[inner.read_pos..]);
            (read_record(&mut cursor)?, inner.read_pos)
        };
        match outcome {
            ReadOutcome::Record { desc, body, size } => {
                self.inner.lock().read_pos = pos + size as usize;
                handler(desc, &body)?;
                Ok(true)
            }
            ReadOutcome::Eof => Ok(false),
            ReadOutcome::Torn => {
                tracing::warn!("torn record at the end of the journal, treated as end-of-journal");
                Ok(false)
            }
        }
    }

    fn append_record(&self, parts: &[&[u8]]) -> Result<u64> {
        let mut inner = self.inner.lock();
        if !inner.state.is_writable() {
            return Err(JournalError::state("append_record", inner.state));
        }
        if inner.faults.fail_append {
            return Err(injected());
        }
        let total: usize = parts.iter().map(|p| p.len()).sum();
        match inner.pending.as_mut() {
            Some(pending) => {
                for part in parts {
                    pending.log.extend_from_slice(part);
                }
            }
            None => {
                for part in parts {
                    inner.log.extend_from_slice(part);
                }
            }
        }
        Ok(total as u64)
    }

    fn create_checkpoint(&self) -> Result<Generation> {
        let mut inner = self.inner.lock();
        if !inner.state.is_writable() {
            return Err(JournalError::state("create_checkpoint", inner.state));
        }
        if inner.pending.is_some() {
            return Err(JournalError::state("create_checkpoint", "checkpoint in progress"));
        }
        let generation = inner.generation.max(0) + 1;
        inner.pending = Some(Pending {
            generation,
            payload: Vec::new(),
            log: Vec::new(),
        });
        Ok(generation)
    }

    fn checkpoint_write(&self, buf: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.faults.fail_checkpoint_write {
            return Err(injected());
        }
        match inner.pending.as_mut() {
            Some(pending) => {
                pending.payload.extend_from_slice(buf);
                Ok(())
            }
            None => Err(JournalError::state("checkpoint_write", "no checkpoint in progress")),
        }
    }

    fn close_checkpoint(&self, commit: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(pending) = inner.pending.take() else {
            return Err(JournalError::state("close_checkpoint", "no checkpoint in progress"));
        };
        if !commit {
            return Ok(());
        }
        if inner.faults.fail_commit {
            return Err(injected());
        }
        inner.generation = pending.generation;
        inner.checkpoint = Some(pending.payload);
        inner.log = pending.log;
        inner.read_pos = 0;
        Ok(())
    }

    fn close(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.state == StorageState::Closed {
            return Ok(false);
        }
        inner.state = StorageState::Closed;
        Ok(true)
    }
}

// ── String-map journallable ─────────────────────────────────────────────────

/// User magic of the string-map journal.
pub const STRING_MAP_MAGIC: Magic = Magic(*b"@JS_map\0");

pub const OP_ADD: Opcode = 1;
pub const OP_DEL: Opcode = 2;
pub const OP_CLR: Opcode = 3;

/// Checkpoint/restore hooks where a one-shot failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    StartCheckpoint,
    SaveCheckpoint,
    RestoreCheckpoint,
}

/// Operations of the [`StringMap`].
///
/// Opcode 1 is ADD — v1 carries `key\nvalue`, v2 carries the key alone and
/// derives the value on apply. Opcode 2 is DEL, which fails on an absent
/// key but reports that failure ignorable. Opcode 3 is the bodyless CLR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapOp {
    Add { key: String, value: String },
    AddDerived { key: String },
    Del { key: String },
    Clr,
}

impl Operation<StringMap> for MapOp {
    fn opcode(&self) -> Opcode {
        match self {
            MapOp::Add { .. } | MapOp::AddDerived { .. } => OP_ADD,
            MapOp::Del { .. } => OP_DEL,
            MapOp::Clr => OP_CLR,
        }
    }

    fn opversion(&self) -> OpVersion {
        match self {
            MapOp::AddDerived { .. } => 2,
            _ => 1,
        }
    }

    fn has_body(&self) -> bool {
        !matches!(self, MapOp::Clr)
    }

    fn save(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            MapOp::Add { key, value } => {
                out.extend_from_slice(key.as_bytes());
                out.push(b'\n');
                out.extend_from_slice(value.as_bytes());
            }
            MapOp::AddDerived { key } | MapOp::Del { key } => {
                out.extend_from_slice(key.as_bytes());
            }
            MapOp::Clr => {}
        }
        Ok(())
    }

    fn restore(&mut self, body: &[u8]) -> Result<()> {
        let text = |bytes: &[u8]| {
            String::from_utf8(bytes.to_vec())
                .map_err(|_| JournalError::corrupted("operation body is not UTF-8"))
        };
        match self {
            MapOp::Add { key, value } => {
                let sep = body
                    .iter()
                    .position(|&b| b == b'\n')
                    .ok_or_else(|| JournalError::corrupted("missing separator in ADD body"))?;
                *key = text(&body[..sep])?;
                *value = text(&body[sep + 1..])?;
            }
            MapOp::AddDerived { key } | MapOp::Del { key } => {
                *key = text(body)?;
            }
            MapOp::Clr => {
                if !body.is_empty() {
                    return Err(JournalError::corrupted("unexpected body in CLR record"));
                }
            }
        }
        Ok(())
    }

    fn apply(&self, target: &StringMap) -> Result<()> {
        let mut data = target.data.lock();
        match self {
            MapOp::Add { key, value } => {
                data.insert(key.clone(), value.clone());
            }
            MapOp::AddDerived { key } => {
                let upper = key.to_uppercase();
                data.insert(key.clone(), format!("{upper}-{upper}"));
            }
            MapOp::Del { key } => {
                if data.remove(key).is_none() {
                    return Err(JournalError::op(self.desc(), format!("no such key: {key}")));
                }
            }
            MapOp::Clr => data.clear(),
        }
        Ok(())
    }

    fn is_ignorable_error(&self, err: &JournalError) -> bool {
        matches!(self, MapOp::Del { .. }) && matches!(err, JournalError::Op(..))
    }
}

/// The journallable of the classic journal test suite: a string→string
/// map with line-oriented snapshots and one-shot failure injection for
/// the checkpoint crash scenarios.
pub struct StringMap {
    data: Mutex<BTreeMap<String, String>>,
    snapshot: Mutex<Option<BTreeMap<String, String>>>,
    fail_at: Mutex<Option<Stage>>,
}

impl StringMap {
    pub fn new() -> Self {
        StringMap {
            data: Mutex::new(BTreeMap::new()),
            snapshot: Mutex::new(None),
            fail_at: Mutex::new(None),
        }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let map = StringMap::new();
        {
            let mut data = map.data.lock();
            for (k, v) in pairs {
                data.insert((*k).to_string(), (*v).to_string());
            }
        }
        map
    }

    pub fn data(&self) -> BTreeMap<String, String> {
        self.data.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Arrange for the next hook at `stage` to fail, once.
    pub fn fail_at(&self, stage: Stage) {
        *self.fail_at.lock() = Some(stage);
    }

    fn take_failure(&self, stage: Stage) -> Result<()> {
        let mut slot = self.fail_at.lock();
        if *slot == Some(stage) {
            *slot = None;
            return Err(injected());
        }
        Ok(())
    }
}

impl Default for StringMap {
    fn default() -> Self {
        StringMap::new()
    }
}

impl Journallable for StringMap {
    type Op = MapOp;

    fn create_operation(&self, desc: Opdesc) -> Result<MapOp> {
        match (desc.code(), desc.version()) {
            (OP_ADD, 1) => Ok(MapOp::Add {
                key: String::new(),
                value: String::new(),
            }),
            (OP_ADD, 2) => Ok(MapOp::AddDerived { key: String::new() }),
            (OP_DEL, 1) => Ok(MapOp::Del { key: String::new() }),
            (OP_CLR, 1) => Ok(MapOp::Clr),
            (OP_ADD | OP_DEL | OP_CLR, _) => Err(JournalError::OpVersion(desc)),
            _ => Err(JournalError::Opcode(desc)),
        }
    }

    fn restore_checkpoint(&self, data: &mut dyn Read, _size: u64) -> Result<()> {
        self.take_failure(Stage::RestoreCheckpoint)?;
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| JournalError::corrupted("checkpoint payload is not UTF-8"))?;

        let mut restored = BTreeMap::new();
        let mut lines = text.lines();
        while let Some(key) = lines.next() {
            if key.is_empty() {
                break;
            }
            let value = lines.next().unwrap_or_default();
            restored.insert(key.to_string(), value.to_string());
        }
        *self.data.lock() = restored;
        Ok(())
    }

    fn start_checkpoint(&self) -> Result<()> {
        self.take_failure(Stage::StartCheckpoint)?;
        let data = self.data.lock().clone();
        *self.snapshot.lock() = Some(data);
        Ok(())
    }

    fn save_checkpoint(&self, out: &mut CheckpointSink<'_>) -> Result<()> {
        let snapshot = self.snapshot.lock().clone().unwrap_or_default();
        for (key, value) in &snapshot {
            out.write_all(key.as_bytes())?;
            out.write_all(b"\n")?;
            out.write_all(value.as_bytes())?;
            out.write_all(b"\n")?;
        }
        // Injected after the payload so the crash scenarios observe a
        // partially written checkpoint.
        self.take_failure(Stage::SaveCheckpoint)?;
        Ok(())
    }

    fn finish_checkpoint(&self) {
        *self.snapshot.lock() = None;
    }

    fn fill_user_magic(&self) -> Option<Magic> {
        Some(STRING_MAP_MAGIC)
    }

    fn op_name(&self, desc: Opdesc) -> &'static str {
        match (desc.code(), desc.version()) {
            (OP_ADD, 2) => "ADD2",
            (OP_ADD, _) => "ADD",
            (OP_DEL, _) => "DEL",
            (OP_CLR, _) => "CLR",
            _ => "",
        }
    }
}

// ── Convenience wrappers for test readability ───────────────────────────────

pub fn add(map: &Journalled<StringMap>, key: &str, value: &str) -> Result<()> {
    map.apply(&MapOp::Add {
        key: key.to_string(),
        value: value.to_string(),
    })
}

pub fn add_derived(map: &Journalled<StringMap>, key: &str) -> Result<()> {
    map.apply(&MapOp::AddDerived {
        key: key.to_string(),
    })
}

pub fn del(map: &Journalled<StringMap>, key: &str) -> Result<()> {
    map.apply(&MapOp::Del {
        key: key.to_string(),
    })
}

pub fn clr(map: &Journalled<StringMap>) -> Result<()> {
    map.apply(&MapOp::Clr)
}

/// Build the expected-state map from literal pairs.
pub fn pairs(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}
