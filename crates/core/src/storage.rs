// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The storage contract: the byte-level container under a journal.
//!
//! A storage holds one committed checkpoint and an ordered chain of
//! segments. In read mode it replays the checkpoint and the records
//! written after it; in write mode it appends records and commits new
//! checkpoints. Implementations carry their own locking — every method
//! takes `&self` — and the one hard rule is that streaming a checkpoint
//! payload must not contend with appending records.

use crate::error::Result;
use crate::types::{Generation, Magic, Opdesc};
use std::fmt;
use std::io::{self, Read, Write};

/// Mutually exclusive states of a storage.
///
/// `Initial → Created | Readable → Writable | Readonly → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    Initial,
    /// Just created for writing; no valid contents yet.
    Created,
    /// Opened and consistency-checked; can replay.
    Readable,
    /// Opened for replay only; `make_writable` is forbidden.
    Readonly,
    /// Can append records and commit checkpoints.
    Writable,
    /// Terminal.
    Closed,
}

impl StorageState {
    pub fn is_readable(self) -> bool {
        matches!(self, StorageState::Readable | StorageState::Readonly)
    }

    pub fn is_writable(self) -> bool {
        self == StorageState::Writable
    }

    pub fn is_readonly(self) -> bool {
        self == StorageState::Readonly
    }
}

impl fmt::Display for StorageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageState::Initial => "initial",
            StorageState::Created => "created",
            StorageState::Readable => "readable",
            StorageState::Readonly => "readonly",
            StorageState::Writable => "writable",
            StorageState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Handler invoked for every replayed operation record.
pub type RecordHandler<'a> = &'a mut dyn FnMut(Opdesc, &[u8]) -> Result<()>;

/// Handler invoked exactly once with the checkpoint snapshot stream and
/// the snapshot size.
pub type CheckpointHandler<'a> = &'a mut dyn FnMut(&mut dyn Read, u64) -> Result<()>;

/// Interface to a journal's underlying storage.
///
/// Read mode (`Readable`/`Readonly`) allows [`replay_checkpoint`] and
/// [`replay_record`]; write mode (`Writable`, reached via
/// [`make_writable`]) allows [`append_record`] and the checkpoint
/// lifecycle. All calls are synchronous; concrete storages may batch
/// their own I/O.
///
/// [`replay_checkpoint`]: Storage::replay_checkpoint
/// [`replay_record`]: Storage::replay_record
/// [`make_writable`]: Storage::make_writable
/// [`append_record`]: Storage::append_record
pub trait Storage: Send + Sync {
    fn state(&self) -> StorageState;

    /// Current committed generation; `NOGEN` before the first commit.
    fn generation(&self) -> Generation;

    /// The user magic found on open, or [`Magic::ZERO`] when the writer
    /// didn't stamp one.
    fn user_magic(&self) -> Magic;

    /// Stamp the user magic to be written into checkpoint and segment
    /// headers. Only valid before the first checkpoint of a created
    /// storage.
    fn set_user_magic(&self, magic: Magic) -> Result<()>;

    /// Toggle the storage into write mode.
    ///
    /// `Created|Readable → Writable`; illegal from `Readonly`. Reopened
    /// storages truncate any torn trailing record and position appends
    /// after the last intact one.
    fn make_writable(&self) -> Result<()>;

    /// Replay the latest committed checkpoint.
    ///
    /// Valid in read mode only. Invokes the handler exactly once with a
    /// bounded stream positioned at the start of the snapshot payload;
    /// fails with `Corrupted` if the checkpoint header or integrity check
    /// fails.
    fn replay_checkpoint(&self, handler: CheckpointHandler<'_>) -> Result<()>;

    /// Replay the next operation record, returning `false` at
    /// end-of-journal.
    ///
    /// A truncated trailing record at the very end of the last segment is
    /// treated as end-of-journal; any other framing or checksum failure
    /// is `Corrupted`.
    fn replay_record(&self, handler: RecordHandler<'_>) -> Result<bool>;

    /// Append one framed operation record, given as scatter parts.
    ///
    /// Valid in write mode only. The record becomes part of the journal
    /// in full — visible to future replay — or not at all. Returns the
    /// on-disk record size.
    fn append_record(&self, parts: &[&[u8]]) -> Result<u64>;

    /// Seal the current segment and start a checkpoint for the next
    /// generation, returning that generation.
    ///
    /// Valid in write mode only; at most one checkpoint may be under
    /// construction. Records appended before `close_checkpoint` land in
    /// the new generation's segment.
    fn create_checkpoint(&self) -> Result<Generation>;

    /// Stream snapshot payload into the checkpoint under construction.
    ///
    /// Must not contend with [`append_record`](Storage::append_record).
    fn checkpoint_write(&self, buf: &[u8]) -> Result<()>;

    /// Finalize the checkpoint under construction.
    ///
    /// On `commit`, make it durable and atomically adopt it as the latest
    /// committed checkpoint; otherwise discard everything written since
    /// [`create_checkpoint`](Storage::create_checkpoint), keeping the
    /// previous checkpoint and its segments intact. Either way, no
    /// checkpoint is under construction once this returns.
    fn close_checkpoint(&self, commit: bool) -> Result<()>;

    /// Release all resources; idempotent. Returns `false` when the
    /// storage was already closed.
    fn close(&self) -> Result<bool>;
}

/// `io::Write` adapter over [`Storage::checkpoint_write`], handed to
/// `Journallable::save_checkpoint`.
pub struct CheckpointSink<'a> {
    storage: &'a dyn Storage,
    written: u64,
}

impl<'a> CheckpointSink<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        CheckpointSink {
            storage,
            written: 0,
        }
    }

    /// Bytes streamed so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Write for CheckpointSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.storage
            .checkpoint_write(buf)
            .map_err(io::Error::other)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
