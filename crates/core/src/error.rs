// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy of the journalling engine.

use crate::types::Opdesc;
use std::io;
use thiserror::Error;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, JournalError>;

/// Errors that can occur in journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Programmer error: an invalid argument was passed.
    #[error("invalid argument: {0}")]
    BadArg(String),
    /// An operation was attempted in a state that does not allow it.
    #[error("{op} not allowed in state {state}")]
    State { op: &'static str, state: String },
    /// Operation on a closed storage or port.
    #[error("{0} is closed")]
    Closed(&'static str),
    /// Unknown opcode encountered during replay.
    #[error("unknown opcode in {0}")]
    Opcode(Opdesc),
    /// Known opcode with an unsupported version encountered during replay.
    #[error("unsupported version in {0}")]
    OpVersion(Opdesc),
    /// An operation failed to apply to its journallable.
    #[error("operation {0} failed: {1}")]
    Op(Opdesc, String),
    /// Framing, checksum, magic, or size-limit violation.
    #[error("corrupted journal: {0}")]
    Corrupted(String),
    /// Underlying storage I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl JournalError {
    pub fn bad_arg(message: impl Into<String>) -> Self {
        JournalError::BadArg(message.into())
    }

    pub fn state(op: &'static str, state: impl ToString) -> Self {
        JournalError::State {
            op,
            state: state.to_string(),
        }
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        JournalError::Corrupted(message.into())
    }

    pub fn op(desc: Opdesc, message: impl Into<String>) -> Self {
        JournalError::Op(desc, message.into())
    }

    /// Framing, checksum, magic, or size-limit violation?
    pub fn is_corrupted(&self) -> bool {
        matches!(self, JournalError::Corrupted(_))
    }

    /// Illegal state transition?
    pub fn is_state_error(&self) -> bool {
        matches!(self, JournalError::State { .. })
    }

    /// Operation-level failure (unknown opcode/version or apply failure)?
    pub fn is_op_error(&self) -> bool {
        matches!(
            self,
            JournalError::Opcode(_) | JournalError::OpVersion(_) | JournalError::Op(..)
        )
    }
}
