// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed journal storage.
//!
//! One committed checkpoint file plus an ordered chain of segment files,
//! kept either next to the checkpoint or in a separate directory reached
//! through the `<name>.segments` symlink. Commit of a checkpoint is the
//! atomic rename of its tmp file; a committed checkpoint of generation G
//! supersedes all files of earlier generations, which are deleted on
//! commit (and swept on `make_writable` after a crash).
//!
//! Locking: one mutex guards the segment chain and all structural
//! operations, a second guards the checkpoint stream under construction,
//! so streaming a snapshot never blocks appends.

use crate::checkpoint::{self, CheckpointWriter};
use crate::layout::{
    checkpoint_filename, checkpoint_tmp_filename, parse_filename, segment_filename,
    segments_link_filename, validate_name, FilenameKind, SegmentHeader,
};
use crate::segment::{self, scan_records, SegmentInfo, SegmentReader, SegmentWriter};
use jot_core::{
    AccMode, CheckpointHandler, Generation, JournalError, Magic, OpenFlags, ReadOutcome,
    RecordHandler, Result, Storage, StorageState, NOGEN,
};
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Segment rotation threshold.
const DEFAULT_SEGMENT_LIMIT: u64 = 64 * 1024 * 1024;

#[derive(Debug)]
struct ActiveSegment {
    info: SegmentInfo,
    writer: SegmentWriter,
}

/// Bookkeeping of a checkpoint under construction: its generation and the
/// tentative segments records are interleaving into.
#[derive(Debug)]
struct CheckpointProgress {
    generation: Generation,
    segments: Vec<SegmentInfo>,
}

#[derive(Debug, Default)]
struct ReplayCursor {
    /// Index into the segment chain of the segment being read.
    index: usize,
    current: Option<SegmentReader>,
    exhausted: bool,
}

#[derive(Debug)]
struct Inner {
    state: StorageState,
    user_magic: Magic,
    /// Committed generation; `NOGEN` until the first commit.
    generation: Generation,
    /// Segment chain of the committed generation, ordered by seq.
    segments: Vec<SegmentInfo>,
    writer: Option<ActiveSegment>,
    cp: Option<CheckpointProgress>,
    replay: ReplayCursor,
}

/// [`Storage`] over plain files.
#[derive(Debug)]
pub struct FileStorage {
    name: String,
    journal_dir: PathBuf,
    segments_dir: PathBuf,
    segment_limit: u64,
    inner: Mutex<Inner>,
    /// The checkpoint payload stream; separate from `inner` so snapshot
    /// writes do not contend with appends.
    pending: Mutex<Option<CheckpointWriter>>,
}

impl FileStorage {
    /// Create a fresh journal, discarding any previous journal of the same
    /// name.
    ///
    /// When `segments` names a separate directory and `no_segments_dir`
    /// is off, a `<name>.segments` symlink pointing at it (verbatim, so
    /// relative targets stay relative) is installed in the journal
    /// directory and all segments are kept behind it.
    pub fn create(
        journal: &Path,
        segments: Option<&Path>,
        flags: OpenFlags,
    ) -> Result<FileStorage> {
        let (journal_dir, name) = split_journal_path(journal)?;
        fs::create_dir_all(&journal_dir)?;
        remove_journal_files(&journal_dir, &name)?;

        let link_path = journal_dir.join(segments_link_filename(&name));
        let segments_dir = match segments {
            Some(target) if !flags.no_segments_dir && !target.as_os_str().is_empty() => {
                fs::create_dir_all(journal_dir.join(target))?;
                std::os::unix::fs::symlink(target, &link_path)?;
                link_path
            }
            _ => journal_dir.clone(),
        };

        debug!(name = %name, dir = %journal_dir.display(), "journal created");
        Ok(FileStorage {
            name,
            journal_dir,
            segments_dir,
            segment_limit: DEFAULT_SEGMENT_LIMIT,
            inner: Mutex::new(Inner {
                state: StorageState::Created,
                user_magic: Magic::ZERO,
                generation: NOGEN,
                segments: Vec::new(),
                writer: None,
                cp: None,
                replay: ReplayCursor::default(),
            }),
            pending: Mutex::new(None),
        })
    }

    /// Open an existing journal.
    ///
    /// `ReadOnly` opens for replay only; `ReadWrite` opens for replay and
    /// later writing (with `flags.create`, a missing journal is created
    /// instead); `WriteOnly` always starts a fresh journal.
    pub fn open(journal: &Path, mode: AccMode, flags: OpenFlags) -> Result<FileStorage> {
        let (journal_dir, name) = split_journal_path(journal)?;
        let checkpoint_path = journal_dir.join(checkpoint_filename(&name));

        if mode == AccMode::WriteOnly {
            return FileStorage::create(journal, None, flags);
        }
        if !checkpoint_path.exists() {
            if mode == AccMode::ReadWrite && flags.create {
                return FileStorage::create(journal, None, flags);
            }
            return Err(JournalError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no journal '{}' in {}", name, journal_dir.display()),
            )));
        }

        let header = checkpoint::read_header(&checkpoint_path)?;

        let link_path = journal_dir.join(segments_link_filename(&name));
        let segments_dir = if !flags.no_segments_dir && link_path.exists() {
            link_path
        } else {
            journal_dir.clone()
        };

        let segments = collect_segments(&segments_dir, &name, header.generation)?;
        for info in &segments {
            let seg_header = segment::read_header(&info.path)?;
            if seg_header.generation != info.generation || seg_header.seq != info.seq {
                return Err(JournalError::corrupted(format!(
                    "segment {} header disagrees with its name",
                    info.path.display()
                )));
            }
            if !seg_header.user_magic.is_zero() && seg_header.user_magic != header.user_magic {
                return Err(JournalError::corrupted(format!(
                    "segment {} carries a foreign user magic",
                    info.path.display()
                )));
            }
        }

        let state = match mode {
            AccMode::ReadOnly => StorageState::Readonly,
            _ => StorageState::Readable,
        };
        debug!(
            name = %name,
            generation = header.generation,
            segments = segments.len(),
            "journal opened"
        );
        Ok(FileStorage {
            name,
            journal_dir,
            segments_dir,
            segment_limit: DEFAULT_SEGMENT_LIMIT,
            inner: Mutex::new(Inner {
                state,
                user_magic: header.user_magic,
                generation: header.generation,
                segments,
                writer: None,
                cp: None,
                replay: ReplayCursor::default(),
            }),
            pending: Mutex::new(None),
        })
    }

    /// Override the segment rotation threshold.
    pub fn with_segment_limit(mut self, bytes: u64) -> Self {
        self.segment_limit = bytes;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn journal_dir(&self) -> &Path {
        &self.journal_dir
    }

    pub fn segments_dir(&self) -> &Path {
        &self.segments_dir
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.journal_dir.join(checkpoint_filename(&self.name))
    }

    fn checkpoint_tmp_path(&self) -> PathBuf {
        self.journal_dir.join(checkpoint_tmp_filename(&self.name))
    }

    fn segment_path(&self, generation: Generation, seq: u32) -> PathBuf {
        self.segments_dir
            .join(segment_filename(&self.name, generation, seq))
    }

    /// Open a new active segment and register it in the right chain.
    fn start_segment(&self, inner: &mut Inner, generation: Generation, seq: u32) -> Result<()> {
        let info = SegmentInfo {
            path: self.segment_path(generation, seq),
            generation,
            seq,
        };
        let writer = SegmentWriter::create(
            &info.path,
            &SegmentHeader {
                user_magic: inner.user_magic,
                generation,
                seq,
            },
        )?;
        match inner.cp.as_mut() {
            Some(cp) if cp.generation == generation => cp.segments.push(info.clone()),
            _ => inner.segments.push(info.clone()),
        }
        inner.writer = Some(ActiveSegment { info, writer });
        Ok(())
    }

    /// Drop the tentative generation and put the previous one back in
    /// charge of appends. Best effort: cleanup failures are logged, not
    /// propagated.
    fn rollback_segments(&self, inner: &mut Inner, cp: CheckpointProgress) {
        inner.writer = None;
        for info in &cp.segments {
            if let Err(error) = fs::remove_file(&info.path) {
                warn!(%error, path = %info.path.display(), "failed to remove aborted segment");
            }
        }
        if let Some(last) = inner.segments.last() {
            match fs::metadata(&last.path)
                .map_err(JournalError::from)
                .and_then(|meta| SegmentWriter::open_end(&last.path, meta.len()))
            {
                Ok(writer) => {
                    inner.writer = Some(ActiveSegment {
                        info: last.clone(),
                        writer,
                    });
                }
                Err(error) => {
                    warn!(%error, path = %last.path.display(), "failed to reopen segment after checkpoint rollback");
                }
            }
        }
    }

    /// Delete files of generations other than `keep` from the segments
    /// directory.
    fn sweep_foreign_segments(&self, keep: Generation) {
        let Ok(entries) = fs::read_dir(&self.segments_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let FilenameKind::Segment { generation, .. } = parse_filename(&self.name, file_name)
            {
                if generation != keep {
                    if let Err(error) = fs::remove_file(entry.path()) {
                        warn!(%error, file_name, "failed to remove stale segment");
                    }
                }
            }
        }
    }
}

impl Storage for FileStorage {
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
        let mut inner = self.inner.lock();
        if inner.state == StorageState::Closed {
            return Err(JournalError::Closed("journal storage"));
        }
        inner.user_magic = magic;
        Ok(())
    }

    fn make_writable(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            StorageState::Created => {
                // Nothing on disk yet; the first checkpoint creates it all.
                inner.state = StorageState::Writable;
                Ok(())
            }
            StorageState::Readable => {
                // Sweep leftovers of crashed writers.
                match fs::remove_file(self.checkpoint_tmp_path()) {
                    Ok(()) => warn!("removed uncommitted checkpoint left by a crash"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                self.sweep_foreign_segments(inner.generation);

                if inner.segments.is_empty() {
                    let generation = inner.generation;
                    self.start_segment(&mut inner, generation, 0)?;
                } else {
                    let last = inner.segments[inner.segments.len() - 1].clone();
                    let scan = scan_records(&last.path)?;
                    if scan.torn {
                        warn!(
                            path = %last.path.display(),
                            valid_end = scan.valid_end,
                            "truncating torn record at the end of the last segment"
                        );
                    }
                    let writer = SegmentWriter::open_end(&last.path, scan.valid_end)?;
                    inner.writer = Some(ActiveSegment { info: last, writer });
                }
                inner.state = StorageState::Writable;
                Ok(())
            }
            state => Err(JournalError::state("make_writable", state)),
        }
    }

    fn replay_checkpoint(&self, handler: CheckpointHandler<'_>) -> Result<()> {
        let state = self.state();
        if !state.is_readable() {
            return Err(JournalError::state("replay_checkpoint", state));
        }
        checkpoint::replay(&self.checkpoint_path(), handler)
    }

    fn replay_record(&self, handler: RecordHandler<'_>) -> Result<bool> {
        let mut inner = self.inner.lock();
        if !inner.state.is_readable() {
            return Err(JournalError::state("replay_record", inner.state));
        }
        loop {
            if inner.replay.exhausted {
                return Ok(false);
            }
            if inner.replay.current.is_none() {
                if inner.replay.index >= inner.segments.len() {
                    inner.replay.exhausted = true;
                    return Ok(false);
                }
                let info = inner.segments[inner.replay.index].clone();
                let reader = SegmentReader::open(&info.path)?;
                let header = *reader.header();
                if header.generation != info.generation || header.seq != info.seq {
                    return Err(JournalError::corrupted(format!(
                        "segment {} header disagrees with its name",
                        info.path.display()
                    )));
                }
                inner.replay.current = Some(reader);
            }
            let last_segment = inner.replay.index + 1 == inner.segments.len();
            let Some(reader) = inner.replay.current.as_mut() else {
                continue;
            };
            match reader.next_record()? {
                ReadOutcome::Record { desc, body, .. } => {
                    handler(desc, &body)?;
                    return Ok(true);
                }
                ReadOutcome::Eof => {
                    inner.replay.current = None;
                    inner.replay.index += 1;
                }
                ReadOutcome::Torn => {
                    if last_segment {
                        warn!("torn record at the end of the journal, treated as end-of-journal");
                        inner.replay.exhausted = true;
                        return Ok(false);
                    }
                    return Err(JournalError::corrupted(
                        "torn record in a non-final segment",
                    ));
                }
            }
        }
    }

    fn append_record(&self, parts: &[&[u8]]) -> Result<u64> {
        let mut inner = self.inner.lock();
        if !inner.state.is_writable() {
            return Err(JournalError::state("append_record", inner.state));
        }
        let Some(active) = inner.writer.as_ref() else {
            return Err(JournalError::state("append_record", "no active segment"));
        };
        if active.writer.len() >= self.segment_limit {
            let generation = active.info.generation;
            let seq = active.info.seq + 1;
            if let Some(sealed) = inner.writer.take() {
                sealed.writer.sync()?;
            }
            self.start_segment(&mut inner, generation, seq)?;
        }
        let Some(active) = inner.writer.as_mut() else {
            return Err(JournalError::state("append_record", "no active segment"));
        };
        active.writer.append(parts)
    }

    fn create_checkpoint(&self) -> Result<Generation> {
        let mut inner = self.inner.lock();
        if !inner.state.is_writable() {
            return Err(JournalError::state("create_checkpoint", inner.state));
        }
        let mut pending = self.pending.lock();
        if pending.is_some() || inner.cp.is_some() {
            return Err(JournalError::state(
                "create_checkpoint",
                "checkpoint in progress",
            ));
        }
        let generation = inner.generation.max(0) + 1;

        let writer = CheckpointWriter::create(
            self.checkpoint_tmp_path(),
            self.checkpoint_path(),
            inner.user_magic,
            generation,
        )?;

        // Seal the active segment; appends from here on go to the new
        // generation's first segment.
        let sealed = inner.writer.take();
        let seal_result = sealed.as_ref().map_or(Ok(()), |active| active.writer.sync());
        if let Err(e) = seal_result {
            inner.writer = sealed;
            abort_quietly(writer);
            return Err(e);
        }
        inner.cp = Some(CheckpointProgress {
            generation,
            segments: Vec::new(),
        });
        if let Err(e) = self.start_segment(&mut inner, generation, 0) {
            inner.cp = None;
            inner.writer = sealed;
            abort_quietly(writer);
            return Err(e);
        }

        *pending = Some(writer);
        debug!(generation, "checkpoint started");
        Ok(generation)
    }

    fn checkpoint_write(&self, buf: &[u8]) -> Result<()> {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(JournalError::state(
                "checkpoint_write",
                "no checkpoint in progress",
            )),
        }
    }

    fn close_checkpoint(&self, commit: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut pending = self.pending.lock();
        let Some(writer) = pending.take() else {
            return Err(JournalError::state(
                "close_checkpoint",
                "no checkpoint in progress",
            ));
        };
        let Some(cp) = inner.cp.take() else {
            return Err(JournalError::state(
                "close_checkpoint",
                "no checkpoint in progress",
            ));
        };

        if !commit {
            abort_quietly(writer);
            self.rollback_segments(&mut inner, cp);
            debug!("checkpoint discarded");
            return Ok(());
        }

        match writer.commit() {
            Ok(()) => {
                // The previous generation is superseded.
                for info in &inner.segments {
                    if let Err(error) = fs::remove_file(&info.path) {
                        warn!(%error, path = %info.path.display(), "failed to remove superseded segment");
                    }
                }
                inner.generation = cp.generation;
                inner.segments = cp.segments;
                debug!(generation = inner.generation, "checkpoint committed");
                Ok(())
            }
            Err(e) => {
                self.rollback_segments(&mut inner, cp);
                Err(e)
            }
        }
    }

    fn close(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.state == StorageState::Closed {
            return Ok(false);
        }
        if let Some(active) = inner.writer.take() {
            if let Err(error) = active.writer.sync() {
                warn!(%error, "failed to sync the active segment on close");
            }
        }
        if let Some(writer) = self.pending.lock().take() {
            abort_quietly(writer);
        }
        if let Some(cp) = inner.cp.take() {
            for info in &cp.segments {
                if let Err(error) = fs::remove_file(&info.path) {
                    warn!(%error, path = %info.path.display(), "failed to remove aborted segment");
                }
            }
        }
        inner.state = StorageState::Closed;
        debug!(name = %self.name, "journal closed");
        Ok(true)
    }
}

fn abort_quietly(writer: CheckpointWriter) {
    if let Err(error) = writer.abort() {
        warn!(%error, "failed to remove an uncommitted checkpoint");
    }
}

fn split_journal_path(journal: &Path) -> Result<(PathBuf, String)> {
    let name = journal
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            JournalError::bad_arg(format!("invalid journal path '{}'", journal.display()))
        })?
        .to_string();
    validate_name(&name)?;
    let dir = match journal.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name))
}

/// Delete every file of the named journal from its directory (and its
/// segments from behind the segments link, if any).
fn remove_journal_files(journal_dir: &Path, name: &str) -> Result<()> {
    let link_path = journal_dir.join(segments_link_filename(name));
    if link_path.symlink_metadata().is_ok() {
        if let Ok(entries) = fs::read_dir(&link_path) {
            for entry in entries.flatten() {
                if let Some(file_name) = entry.file_name().to_str() {
                    if matches!(
                        parse_filename(name, file_name),
                        FilenameKind::Segment { .. }
                    ) {
                        fs::remove_file(entry.path())?;
                    }
                }
            }
        }
        fs::remove_file(&link_path)?;
    }
    if let Ok(entries) = fs::read_dir(journal_dir) {
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let known = matches!(
                parse_filename(name, file_name),
                FilenameKind::Checkpoint | FilenameKind::Segment { .. }
            ) || file_name == checkpoint_tmp_filename(name);
            if known {
                fs::remove_file(entry.path())?;
            }
        }
    }
    Ok(())
}

/// Collect the committed generation's segments, ordered and contiguous.
fn collect_segments(
    segments_dir: &Path,
    name: &str,
    generation: Generation,
) -> Result<Vec<SegmentInfo>> {
    let mut segments = Vec::new();
    let entries = match fs::read_dir(segments_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(segments),
        Err(e) => return Err(e.into()),
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let FilenameKind::Segment {
            generation: seg_generation,
            seq,
        } = parse_filename(name, file_name)
        {
            if seg_generation == generation {
                segments.push(SegmentInfo {
                    path: entry.path(),
                    generation,
                    seq,
                });
            }
        }
    }
    segments.sort_by_key(|info| info.seq);
    for (index, info) in segments.iter().enumerate() {
        if info.seq != index as u32 {
            return Err(JournalError::corrupted(format!(
                "segment chain of generation {generation} has a gap at seq {index}"
            )));
        }
    }
    Ok(segments)
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
