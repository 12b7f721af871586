// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The journal handle.
//!
//! All journal traffic of a journalled system goes through its port; from
//! the system's point of view, the port *is* the journal. A port owns
//! exactly one storage and serializes writes to it.

use crate::error::Result;
use crate::journal::Journallable;
use crate::op::Operation;
use crate::record::Frame;
use crate::storage::{Storage, StorageState};
use crate::types::{Generation, Opdesc};
use parking_lot::Mutex;
use std::fmt;
use tracing::warn;

/// A journal descriptor.
///
/// Dropping the port closes the underlying storage.
pub struct Port {
    storage: Box<dyn Storage>,
    /// Serializes `store`: framing and append happen as one unit, so
    /// records appear in the log in submission order per producer.
    write_lock: Mutex<()>,
}

impl Port {
    /// Create a journal port over a storage.
    pub fn new(storage: Box<dyn Storage>) -> Port {
        Port {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Current generation of the journal.
    pub fn generation(&self) -> Generation {
        self.storage.generation()
    }

    pub fn storage_state(&self) -> StorageState {
        self.storage.state()
    }

    pub(crate) fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Put an operation into the journal.
    ///
    /// Serializes the operation body, frames it and appends the record.
    /// Returns the full on-disk record size. Bodies over the operation
    /// size limit are rejected with `BadArg` before anything is written.
    pub fn store<T>(&self, op: &impl Operation<T>) -> Result<u64> {
        let mut body = Vec::new();
        if op.has_body() {
            op.save(&mut body)?;
        }
        let frame = Frame::build(op.desc(), &body)?;
        let _guard = self.write_lock.lock();
        self.storage
            .append_record(&[&frame.prefix, &body, &frame.trailer])
    }

    /// Read the next record from the journal and create an operation.
    ///
    /// Asks the journallable to construct an operation for the record's
    /// descriptor, then restores it from the record body. Returns `None`
    /// at the end of the journal.
    ///
    /// Only legal during recovery, while no operations are being stored.
    pub fn next<J: Journallable>(&self, target: &J) -> Result<Option<J::Op>> {
        let mut result = None;
        self.storage.replay_record(&mut |desc, body| {
            let mut op = target.create_operation(desc)?;
            op.restore(body)?;
            result = Some(op);
            Ok(())
        })?;
        Ok(result)
    }

    /// Read the next operation description and discard the operation data.
    ///
    /// In contrast to [`next`](Port::next), requires no journallable;
    /// used by diagnostic tools. Returns the descriptor and the full
    /// on-disk record size, or `None` at the end of the journal.
    pub fn skip(&self) -> Result<Option<(Opdesc, u64)>> {
        let mut result = None;
        self.storage.replay_record(&mut |desc, body| {
            result = Some((desc, Frame::total_size(body.len())));
            Ok(())
        })?;
        Ok(result)
    }

    /// Close the underlying storage.
    pub fn close(&self) -> Result<()> {
        self.storage.close().map(|_| ())
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        if let Err(error) = self.storage.close() {
            warn!(%error, "failed to close journal storage");
        }
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("state", &self.storage.state())
            .field("generation", &self.storage.generation())
            .finish()
    }
}

#[cfg(test)]
#[path = "port_tests.rs"]
mod tests;
