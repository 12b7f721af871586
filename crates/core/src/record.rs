// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk framing of a single operation record.
//!
//! A record is `magic || header || body || crc32`: an 8-byte record magic,
//! a fixed 16-byte header (opcode, opversion, body size, reserved word),
//! the opaque body, and a CRC-32 covering everything from the end of the
//! magic through the end of the body. All fixed-width fields are
//! little-endian.
//!
//! Decoding distinguishes a *torn* record (the stream ended mid-frame,
//! tolerable at the very end of the last segment) from *corruption* (bad
//! magic, oversized body, checksum mismatch with all bytes present) — the
//! caller decides which torn records are fatal.

use crate::error::{JournalError, Result};
use crate::types::{Magic, Opdesc, MAX_OPSIZE};
use std::io::{self, Read};

/// Leading magic of every operation record.
pub const RECORD_MAGIC: Magic = Magic(*b"#jot.rec");

/// Fixed record header size: opcode + opversion + body size + reserved.
pub const RECORD_HEADER_SIZE: usize = 16;

/// Bytes preceding the body: record magic plus header.
pub const RECORD_PREFIX_SIZE: usize = 8 + RECORD_HEADER_SIZE;

/// Bytes following the body: the CRC-32 trailer.
pub const RECORD_TRAILER_SIZE: usize = 4;

/// Total framing overhead of one record.
pub const RECORD_OVERHEAD: usize = RECORD_PREFIX_SIZE + RECORD_TRAILER_SIZE;

/// The scatter parts of a framed record.
///
/// The body is supplied by the caller at write time, so framing never
/// copies it: a record on disk is `prefix || body || trailer`.
#[derive(Debug)]
pub struct Frame {
    pub prefix: [u8; RECORD_PREFIX_SIZE],
    pub trailer: [u8; RECORD_TRAILER_SIZE],
}

impl Frame {
    /// Frame an operation body.
    ///
    /// Bodies over [`MAX_OPSIZE`] are rejected with `BadArg` (the
    /// submit-side size check; the decode side rejects them as corruption).
    pub fn build(desc: Opdesc, body: &[u8]) -> Result<Frame> {
        if body.len() > MAX_OPSIZE {
            return Err(JournalError::bad_arg(format!(
                "operation body of {} bytes exceeds the {} byte limit",
                body.len(),
                MAX_OPSIZE
            )));
        }
        let mut prefix = [0u8; RECORD_PREFIX_SIZE];
        prefix[..8].copy_from_slice(RECORD_MAGIC.as_bytes());
        prefix[8..12].copy_from_slice(&desc.code().to_le_bytes());
        prefix[12..16].copy_from_slice(&desc.version().to_le_bytes());
        prefix[16..20].copy_from_slice(&(body.len() as u32).to_le_bytes());
        // prefix[20..24] is the reserved word, kept zero

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&prefix[8..]);
        hasher.update(body);
        Ok(Frame {
            prefix,
            trailer: hasher.finalize().to_le_bytes(),
        })
    }

    /// Full on-disk size of a record with a body of `body_len` bytes.
    pub fn total_size(body_len: usize) -> u64 {
        (RECORD_OVERHEAD + body_len) as u64
    }
}

/// Outcome of reading one record off a stream.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete, checksum-verified record.
    Record {
        desc: Opdesc,
        body: Vec<u8>,
        /// Full on-disk size, including magic, header and trailer.
        size: u64,
    },
    /// Clean end of stream at a record boundary.
    Eof,
    /// The stream ended mid-record.
    Torn,
}

/// Read and verify the next record from `r`.
pub fn read_record(r: &mut dyn Read) -> Result<ReadOutcome> {
    let mut prefix = [0u8; RECORD_PREFIX_SIZE];
    match fill(r, &mut prefix)? {
        Filled::Empty => return Ok(ReadOutcome::Eof),
        Filled::Short => return Ok(ReadOutcome::Torn),
        Filled::Full => {}
    }
    if prefix[..8] != RECORD_MAGIC.0 {
        return Err(JournalError::corrupted("bad record magic"));
    }
    let desc = Opdesc::new(le_i32(&prefix[8..12]), le_u32(&prefix[12..16]));
    let body_size = le_u32(&prefix[16..20]) as usize;
    if body_size > MAX_OPSIZE {
        return Err(JournalError::corrupted(format!(
            "record body of {body_size} bytes exceeds the {MAX_OPSIZE} byte limit"
        )));
    }

    let mut body = vec![0u8; body_size];
    if !matches!(fill(r, &mut body)?, Filled::Full) {
        return Ok(ReadOutcome::Torn);
    }
    let mut trailer = [0u8; RECORD_TRAILER_SIZE];
    if !matches!(fill(r, &mut trailer)?, Filled::Full) {
        return Ok(ReadOutcome::Torn);
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&prefix[8..]);
    hasher.update(&body);
    if hasher.finalize() != u32::from_le_bytes(trailer) {
        return Err(JournalError::corrupted(format!("checksum mismatch in {desc}")));
    }

    Ok(ReadOutcome::Record {
        desc,
        body,
        size: Frame::total_size(body_size),
    })
}

enum Filled {
    Full,
    Short,
    Empty,
}

fn fill(r: &mut dyn Read, buf: &mut [u8]) -> Result<Filled> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    Filled::Empty
                } else {
                    Filled::Short
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Filled::Full)
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

fn le_i32(bytes: &[u8]) -> i32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    i32::from_le_bytes(word)
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
