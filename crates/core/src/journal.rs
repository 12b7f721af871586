// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The journallable contract and the engine state machine around it.
//!
//! A [`Journallable`] defines the operations of a log-structured system
//! and the checkpoint hooks; [`Journalled`] wraps one such object and
//! drives recovery, journalling and checkpointing against a [`Port`].
//!
//! Recovery, in terms of the hooks:
//!
//! ```text
//! restore_from:
//!     Journallable::restore_checkpoint(stream, size)
//!     while the journal has records:
//!         Journallable::create_operation(desc)
//!         Operation::restore(body)
//!         Operation::apply(target)
//! ```
//!
//! Checkpointing interleaves journallable and storage calls — note that
//! they interleave rather than nest:
//!
//! ```text
//! take_checkpoint:
//!     Journallable::start_checkpoint()      // snapshot, must be fast
//!     Storage::create_checkpoint()          // seals the segment
//!     Journallable::save_checkpoint(sink)   // streams the snapshot
//!     Journallable::finish_checkpoint()     // releases it, cannot fail
//!     Storage::close_checkpoint(commit)     // atomically adopts it
//! ```

use crate::error::{JournalError, Result};
use crate::op::Operation;
use crate::port::Port;
use crate::storage::CheckpointSink;
use crate::types::{Generation, Magic, Opdesc, NOGEN};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

/// Mutually exclusive states of a journalled object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalState {
    /// Just constructed; neither restored nor attached to a journal.
    Initial,
    /// In the process of restoring from a journal.
    Restoring,
    /// Restored from a journal; no journal to write to.
    Restored,
    /// There is a journal to write operations to.
    Active,
    /// Making a checkpoint.
    Checkpoint,
    /// Poisoned: in-memory and on-disk states have diverged, further
    /// writes are refused.
    Invalid,
}

impl fmt::Display for JournalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JournalState::Initial => "initial",
            JournalState::Restoring => "restoring",
            JournalState::Restored => "restored",
            JournalState::Active => "active",
            JournalState::Checkpoint => "checkpoint",
            JournalState::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// The interface through which the journalling engine interacts with the
/// journalled system.
pub trait Journallable: Send + Sync + Sized + 'static {
    /// The operation family of this journallable.
    type Op: Operation<Self>;

    /// Construct an operation able to `restore` bytes previously written
    /// by the same descriptor.
    ///
    /// Called during replay. An unknown opcode is an `Opcode` error, a
    /// known opcode with an unknown version an `OpVersion` error; both
    /// are fatal to recovery.
    fn create_operation(&self, desc: Opdesc) -> Result<Self::Op>;

    /// Set the in-memory state to match a checkpoint snapshot.
    ///
    /// Called at most once, from [`Journalled::restore_from`].
    fn restore_checkpoint(&self, data: &mut dyn Read, size: u64) -> Result<()>;

    /// Build an immutable snapshot of the state required for a checkpoint.
    ///
    /// Must return promptly — copy, version or freeze; the streaming is
    /// done by `save_checkpoint`.
    fn start_checkpoint(&self) -> Result<()>;

    /// Stream the snapshot built by `start_checkpoint` into the journal.
    fn save_checkpoint(&self, out: &mut CheckpointSink<'_>) -> Result<()>;

    /// Release the snapshot. Terminal cleanup only; cannot fail.
    fn finish_checkpoint(&self);

    /// The 8-byte user magic stamped into checkpoint and segment headers
    /// on write and verified on read. `None` means "don't care": zeros
    /// are written and any magic is accepted.
    fn fill_user_magic(&self) -> Option<Magic> {
        None
    }

    /// Whether an operation may be journalled to this object.
    ///
    /// The operation family is already pinned by the type system; narrow
    /// further here if some family members don't apply to this instance.
    fn is_op_compatible(&self, _op: &Self::Op) -> bool {
        true
    }

    /// Human-readable name of an operation, for diagnostics.
    fn op_name(&self, _desc: Opdesc) -> &'static str {
        ""
    }
}

/// A journalled object: the engine state machine wrapped around a
/// [`Journallable`] target.
///
/// The journal attachment is 1-to-1 and enforced by ownership: attaching
/// a [`Port`] moves it into the object, and [`set_journal`] hands the
/// previous one back.
///
/// [`set_journal`]: Journalled::set_journal
pub struct Journalled<J: Journallable> {
    target: J,
    state: Mutex<JournalState>,
    /// The attached journal. Taken shared by `apply`, exclusively by
    /// attachment changes and by the checkpoint snapshot window.
    journal: RwLock<Option<Port>>,
    /// Serializes whole checkpoints: at most one runs at a time.
    cp_lock: Mutex<()>,
    change_count: AtomicU64,
}

impl<J: Journallable> Journalled<J> {
    pub fn new(target: J) -> Self {
        Journalled {
            target,
            state: Mutex::new(JournalState::Initial),
            journal: RwLock::new(None),
            cp_lock: Mutex::new(()),
            change_count: AtomicU64::new(0),
        }
    }

    /// The journalled object itself.
    pub fn target(&self) -> &J {
        &self.target
    }

    pub fn state(&self) -> JournalState {
        *self.state.lock()
    }

    /// Number of operations applied so far, replayed ones included.
    pub fn change_count(&self) -> u64 {
        self.change_count.load(Ordering::Relaxed)
    }

    /// Whether a journal is attached.
    pub fn has_journal(&self) -> bool {
        self.journal.read().is_some()
    }

    /// Current generation of the attached journal, `NOGEN` without one.
    pub fn generation(&self) -> Generation {
        self.journal.read().as_ref().map_or(NOGEN, Port::generation)
    }

    /// Restore the state of the object from a journal.
    ///
    /// `Initial → Restoring → Restored`. Replays the committed checkpoint
    /// into [`Journallable::restore_checkpoint`], then applies every
    /// surviving record in order. An operation whose `apply` fails is
    /// skipped iff it reports the error ignorable; any other failure
    /// poisons the object and propagates, leaving the journal untouched.
    ///
    /// To continue journalling to the same journal, pass the port on to
    /// [`set_journal`](Journalled::set_journal) afterwards.
    pub fn restore_from(&self, port: &Port) -> Result<()> {
        let _attachment = self.journal.write();
        self.transition("restore_from", JournalState::Initial, JournalState::Restoring)?;
        match self.replay(port) {
            Ok(applied) => {
                debug!(applied, generation = port.generation(), "journal replayed");
                self.set_state(JournalState::Restored);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "restore failed, poisoning journallable");
                self.poison();
                Err(e)
            }
        }
    }

    fn replay(&self, port: &Port) -> Result<u64> {
        let storage = port.storage();
        if !storage.state().is_readable() {
            return Err(JournalError::state("restore_from", storage.state()));
        }
        if let Some(expected) = self.target.fill_user_magic() {
            let found = storage.user_magic();
            if !found.is_zero() && found != expected {
                return Err(JournalError::corrupted(format!(
                    "user magic mismatch: journal has '{found}', journallable expects '{expected}'"
                )));
            }
        }

        storage.replay_checkpoint(&mut |data, size| self.target.restore_checkpoint(data, size))?;

        let mut applied = 0u64;
        while let Some(op) = port.next(&self.target)? {
            match op.apply(&self.target) {
                Ok(()) => {
                    self.change_count.fetch_add(1, Ordering::Relaxed);
                    applied += 1;
                }
                Err(e) if op.is_ignorable_error(&e) => {
                    warn!(
                        op = %op.desc(),
                        name = self.target.op_name(op.desc()),
                        error = %e,
                        "skipping journalled operation that cannot be re-applied"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(applied)
    }

    /// Attach a journal and start journalling to it.
    ///
    /// `Initial|Restored → Active`. Brings the storage to write mode and
    /// immediately takes a checkpoint, so upon return the journal holds
    /// the current in-memory state under a fresh generation.
    ///
    /// Returns the previously attached port, if any.
    pub fn set_journal(&self, port: Port) -> Result<Option<Port>> {
        let mut attachment = self.journal.write();
        let state = self.state();
        if !matches!(state, JournalState::Initial | JournalState::Restored) {
            return Err(JournalError::state("set_journal", state));
        }

        let storage = port.storage();
        if let Some(magic) = self.target.fill_user_magic() {
            let found = storage.user_magic();
            if found.is_zero() {
                storage.set_user_magic(magic)?;
            } else if found != magic {
                return Err(JournalError::corrupted(format!(
                    "user magic mismatch: journal has '{found}', journallable expects '{magic}'"
                )));
            }
        }
        if !storage.state().is_writable() {
            storage.make_writable()?;
        }

        // Initial checkpoint: no applies can interleave here, the
        // attachment is held exclusively and the state is not yet Active.
        self.target.start_checkpoint()?;
        let generation = match storage.create_checkpoint() {
            Ok(generation) => generation,
            Err(e) => {
                self.target.finish_checkpoint();
                return Err(e);
            }
        };
        let saved = {
            let mut sink = CheckpointSink::new(storage);
            self.target.save_checkpoint(&mut sink)
        };
        self.target.finish_checkpoint();
        match saved {
            Ok(()) => storage.close_checkpoint(true)?,
            Err(e) => {
                if let Err(error) = storage.close_checkpoint(false) {
                    warn!(%error, "discarding initial checkpoint failed");
                }
                return Err(e);
            }
        }
        debug!(generation, "journal attached with initial checkpoint");

        let previous = attachment.replace(port);
        self.set_state(JournalState::Active);
        Ok(previous)
    }

    /// Apply an operation: journal it first, then mutate the in-memory
    /// state.
    ///
    /// If the store fails, the in-memory state is untouched. If `apply`
    /// fails after the record is durable, the object poisons — unless the
    /// operation reports the error ignorable, in which case memory and
    /// journal still agree (replay will skip the record the same way) and
    /// the error merely propagates.
    pub fn apply(&self, op: &J::Op) -> Result<()> {
        let attachment = self.journal.read();
        let Some(port) = attachment.as_ref() else {
            return Err(JournalError::state("apply", self.state()));
        };
        let state = self.state();
        if !matches!(state, JournalState::Active | JournalState::Checkpoint) {
            return Err(JournalError::state("apply", state));
        }
        if !self.target.is_op_compatible(op) {
            return Err(JournalError::bad_arg(format!(
                "operation {} is not compatible with this journallable",
                op.desc()
            )));
        }

        op.lock_target(&self.target, true);
        let result = match port.store(op) {
            // Nothing durable, nothing applied.
            Err(e) => Err(e),
            Ok(_size) => match op.apply(&self.target) {
                Ok(()) => {
                    self.change_count.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(e) if op.is_ignorable_error(&e) => {
                    // The record is durable but had no effect; replay
                    // will skip it the same way.
                    warn!(op = %op.desc(), error = %e, "journalled operation failed ignorably");
                    Err(e)
                }
                Err(e) => {
                    // The journal now holds a record whose effect is not
                    // reflected in memory.
                    error!(op = %op.desc(), error = %e, "operation failed after journalling, poisoning journallable");
                    self.poison();
                    Err(e)
                }
            },
        };
        op.lock_target(&self.target, false);
        result
    }

    /// Take a checkpoint and save it into the journal, returning the new
    /// generation. `Active` only; at most one checkpoint runs per object.
    ///
    /// The snapshot window (`start_checkpoint` + `create_checkpoint`)
    /// excludes `apply`, so the snapshot observes exactly the operations
    /// applied so far; once the snapshot is streaming, applies interleave
    /// and land in the new generation's segment.
    pub fn take_checkpoint(&self) -> Result<Generation> {
        let _cp = self.cp_lock.lock();

        let attachment = self.journal.write();
        let generation = {
            let Some(port) = attachment.as_ref() else {
                return Err(JournalError::state("take_checkpoint", self.state()));
            };
            let state = self.state();
            if state != JournalState::Active {
                return Err(JournalError::state("take_checkpoint", state));
            }
            self.set_state(JournalState::Checkpoint);
            if let Err(e) = self.target.start_checkpoint() {
                self.set_state(JournalState::Active);
                return Err(e);
            }
            match port.storage().create_checkpoint() {
                Ok(generation) => generation,
                Err(e) => {
                    self.target.finish_checkpoint();
                    self.set_state(JournalState::Active);
                    return Err(e);
                }
            }
        };
        let changes_at_create = self.change_count();

        // Applies may interleave from here on.
        let attachment = RwLockWriteGuard::downgrade(attachment);
        let Some(port) = attachment.as_ref() else {
            // The attachment cannot change while the lock is held.
            return Err(JournalError::state("take_checkpoint", self.state()));
        };
        let storage = port.storage();

        let saved = {
            let mut sink = CheckpointSink::new(storage);
            self.target
                .save_checkpoint(&mut sink)
                .map(|()| sink.written())
        };
        self.target.finish_checkpoint();

        match saved {
            Ok(bytes) => match storage.close_checkpoint(true) {
                Ok(()) => {
                    debug!(generation, bytes, "checkpoint committed");
                    self.set_state(JournalState::Active);
                    Ok(generation)
                }
                Err(e) => {
                    self.settle_aborted_checkpoint(changes_at_create);
                    Err(e)
                }
            },
            Err(e) => {
                if let Err(error) = storage.close_checkpoint(false) {
                    warn!(%error, "discarding aborted checkpoint failed");
                }
                self.settle_aborted_checkpoint(changes_at_create);
                Err(e)
            }
        }
    }

    /// Restore the state after a checkpoint rollback. Records appended
    /// during the aborted window were discarded with it; if any operation
    /// was applied in that window, memory and journal have diverged.
    fn settle_aborted_checkpoint(&self, changes_at_create: u64) {
        if self.change_count() != changes_at_create {
            error!("operations lost with an aborted checkpoint, poisoning journallable");
            self.poison();
        } else {
            self.set_state(JournalState::Active);
        }
    }

    fn transition(&self, op: &'static str, from: JournalState, to: JournalState) -> Result<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(JournalError::state(op, *state));
        }
        *state = to;
        Ok(())
    }

    /// Set the state unless the object is poisoned; `Invalid` is terminal.
    fn set_state(&self, next: JournalState) {
        let mut state = self.state.lock();
        if *state != JournalState::Invalid {
            *state = next;
        }
    }

    fn poison(&self) {
        *self.state.lock() = JournalState::Invalid;
    }
}

impl<J: Journallable> fmt::Debug for Journalled<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journalled")
            .field("state", &self.state())
            .field("changes", &self.change_count())
            .finish()
    }
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
