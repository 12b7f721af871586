// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint files and their commit protocol.
//!
//! A checkpoint is written to `<name>.checkpoint.tmp` while under
//! construction and adopted by an atomic rename over `<name>.checkpoint`.
//! The rename is the commit marker: the tmp file is fsynced before the
//! rename and the directory after it, so either the old or the new
//! checkpoint survives a crash — never a half-written one. A `.tmp`
//! found on open is an uncommitted checkpoint and is ignored.
//!
//! Layout: fixed header (see [`CheckpointHeader`]) padded to
//! `MAX_HDRSIZE`, the opaque snapshot payload, and a trailing CRC-32 of
//! the payload. The header is rewritten with the final snapshot size just
//! before the commit rename.

use crate::layout::{fsync_dir, CheckpointHeader};
use jot_core::{CheckpointHandler, Generation, JournalError, Magic, Result, MAX_HDRSIZE};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Streaming writer of a checkpoint under construction.
#[derive(Debug)]
pub struct CheckpointWriter {
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: File,
    hasher: crc32fast::Hasher,
    user_magic: Magic,
    generation: Generation,
    written: u64,
}

impl CheckpointWriter {
    /// Open the tmp file and reserve the header block. Any leftover tmp
    /// from a crashed checkpoint is overwritten.
    pub fn create(
        tmp_path: PathBuf,
        final_path: PathBuf,
        user_magic: Magic,
        generation: Generation,
    ) -> Result<CheckpointWriter> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let header = CheckpointHeader {
            user_magic,
            generation,
            snapshot_size: 0,
        };
        file.write_all(&header.encode())?;
        Ok(CheckpointWriter {
            tmp_path,
            final_path,
            file,
            hasher: crc32fast::Hasher::new(),
            user_magic,
            generation,
            written: 0,
        })
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Stream snapshot payload bytes.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf)?;
        self.hasher.update(buf);
        self.written += buf.len() as u64;
        Ok(())
    }

    /// Finalize and atomically adopt the checkpoint. A failed commit
    /// removes the tmp file and leaves the previous checkpoint in place.
    pub fn commit(mut self) -> Result<()> {
        match self.finalize() {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&self.tmp_path);
                Err(e)
            }
        }
    }

    fn finalize(&mut self) -> Result<()> {
        // Trailing payload CRC, then the header with the final size.
        let crc = self.hasher.clone().finalize();
        self.file.write_all(&crc.to_le_bytes())?;
        let header = CheckpointHeader {
            user_magic: self.user_magic,
            generation: self.generation,
            snapshot_size: self.written,
        };
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.encode())?;
        self.file.sync_all()?;

        fs::rename(&self.tmp_path, &self.final_path)?;
        if let Some(parent) = self.final_path.parent() {
            fsync_dir(parent)?;
        }
        Ok(())
    }

    /// Discard the checkpoint under construction.
    pub fn abort(self) -> Result<()> {
        drop(self.file);
        fs::remove_file(&self.tmp_path)?;
        Ok(())
    }
}

/// Read and verify the header of a committed checkpoint file.
pub fn read_header(path: &Path) -> Result<CheckpointHeader> {
    let mut file = File::open(path)?;
    let mut block = vec![0u8; MAX_HDRSIZE];
    read_exact(&mut file, &mut block, path)?;
    CheckpointHeader::decode(&block)
}

/// Replay a committed checkpoint: verify header and payload integrity,
/// then hand a bounded payload reader to the handler.
pub fn replay(path: &Path, handler: CheckpointHandler<'_>) -> Result<()> {
    let header = read_header(path)?;

    // First pass: stream the payload through the hasher only.
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(MAX_HDRSIZE as u64))?;
    let mut reader = BufReader::new(file);
    let mut hasher = crc32fast::Hasher::new();
    let mut remaining = header.snapshot_size;
    let mut chunk = [0u8; 64 * 1024];
    while remaining > 0 {
        let want = chunk.len().min(remaining as usize);
        let n = reader.read(&mut chunk[..want])?;
        if n == 0 {
            return Err(JournalError::corrupted(format!(
                "checkpoint {} is shorter than its header claims",
                path.display()
            )));
        }
        hasher.update(&chunk[..n]);
        remaining -= n as u64;
    }
    let mut trailer = [0u8; 4];
    read_exact(&mut reader, &mut trailer, path)?;
    if hasher.finalize() != u32::from_le_bytes(trailer) {
        return Err(JournalError::corrupted(format!(
            "checkpoint {} payload checksum mismatch",
            path.display()
        )));
    }

    // Second pass: hand the verified payload to the handler.
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(MAX_HDRSIZE as u64))?;
    let mut payload = BufReader::new(file).take(header.snapshot_size);
    handler(&mut payload, header.snapshot_size)
}

fn read_exact(reader: &mut dyn Read, buf: &mut [u8], path: &Path) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(JournalError::corrupted(format!(
                "checkpoint {} is truncated",
                path.display()
            )));
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
