// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The journalled operation contract.

use crate::error::{JournalError, Result};
use crate::types::{OpVersion, Opcode, Opdesc};

/// A single state-mutating action of a journallable of type `T`.
///
/// An operation family is typically an enum: the opcode discriminates a
/// closed set of body shapes, and the version tag lets old record layouts
/// coexist with newer ones in the same journal.
///
/// The engine writes an operation to the journal *before* applying it, so
/// `apply` may legally fail after the record is durable. Operations whose
/// failures leave the target consistent should report such errors as
/// ignorable, or replay will wedge on their records.
pub trait Operation<T>: Send {
    /// The operation code stored in the record header.
    fn opcode(&self) -> Opcode;

    /// The operation version stored in the record header.
    fn opversion(&self) -> OpVersion {
        1
    }

    /// Some operations carry no payload at all, only opcode and version.
    fn has_body(&self) -> bool {
        true
    }

    /// Write the operation body. Never called when `has_body()` is false.
    fn save(&self, out: &mut Vec<u8>) -> Result<()>;

    /// Set the operation to the state `save` would have produced.
    ///
    /// Called only during replay. Must succeed on any byte sequence
    /// previously written by the same (opcode, opversion) pair and fail
    /// cleanly on anything else. Bodyless operations are restored from an
    /// empty buffer.
    fn restore(&mut self, body: &[u8]) -> Result<()>;

    /// Apply the operation to its target.
    ///
    /// Targets synchronize their own state internally, so replay and
    /// concurrent submission both go through `&T`.
    fn apply(&self, target: &T) -> Result<()>;

    /// Lock the target before journalling, unlock after applying.
    ///
    /// Called around the store+apply pair of a live submission; not called
    /// during replay.
    fn lock_target(&self, _target: &T, _acquire: bool) {}

    /// Whether a failure of `apply` may be safely skipped during replay.
    ///
    /// An operation is written before it is applied, so it can fail at the
    /// moment of original application *after* having been saved, while
    /// leaving the target consistent. Such a record inevitably fails again
    /// while being restored, and that failure may (and should) be ignored.
    fn is_ignorable_error(&self, _err: &JournalError) -> bool {
        false
    }

    /// The (opcode, opversion) descriptor of this operation.
    fn desc(&self) -> Opdesc {
        Opdesc::new(self.opcode(), self.opversion())
    }
}
