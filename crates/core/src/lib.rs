// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! jot-core: a journalling engine for log-structured services.
//!
//! The engine reconstructs an in-memory object (the *journallable*) after a
//! crash by combining the last committed *checkpoint* with the ordered
//! *operation records* appended since. It is storage-agnostic and
//! object-agnostic: the user supplies both the [`Journallable`] (with its
//! [`Operation`] family) and the [`Storage`] the journal lives in, and the
//! engine prescribes the recovery protocol, the record framing, and the
//! concurrency discipline around checkpointing.
//!
//! Write path: `Journalled::apply` → `Operation::save` → [`Port::store`] →
//! `Storage::append_record`; the in-memory state is mutated only after the
//! record is durable.
//!
//! Read path: `Journalled::restore_from` → `Storage::replay_checkpoint` →
//! `Journallable::restore_checkpoint`, then one `Journallable::create_operation`
//! + `Operation::restore` + `Operation::apply` per surviving record.

mod error;
mod journal;
mod op;
mod port;
mod record;
mod storage;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{JournalError, Result};
pub use journal::{JournalState, Journallable, Journalled};
pub use op::Operation;
pub use port::Port;
pub use record::{
    read_record, Frame, ReadOutcome, RECORD_HEADER_SIZE, RECORD_MAGIC, RECORD_OVERHEAD,
    RECORD_PREFIX_SIZE, RECORD_TRAILER_SIZE,
};
pub use storage::{CheckpointHandler, CheckpointSink, RecordHandler, Storage, StorageState};
pub use types::{
    AccMode, Generation, Magic, OpVersion, Opcode, Opdesc, OpenFlags, MAX_HDRSIZE, MAX_JNAME,
    MAX_OPSIZE, NOGEN,
};
