// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Torn-write tolerance: truncating the last record by any amount leaves
//! a recoverable journal with the state just before that record.

use crate::prelude::*;
use jot_core::test_support::{add, pairs, StringMap};
use jot_core::{JournalState, Journalled, RECORD_OVERHEAD};
use jot_storage::{parse_filename, FilenameKind};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// The single segment file of a flat journal.
fn segment_path(dir: &Path, name: &str) -> PathBuf {
    let mut segments: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|file| matches!(parse_filename(name, file), FilenameKind::Segment { .. }))
        })
        .map(|entry| entry.path())
        .collect();
    assert_eq!(segments.len(), 1, "expected exactly one segment");
    segments.remove(0)
}

fn truncate(path: &Path, by: u64) {
    let len = std::fs::metadata(path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(len - by).unwrap();
}

#[test]
fn any_tear_of_the_last_record_recovers_to_the_previous_state() {
    // "Bye\nbaby!" body is 9 bytes
    let last_record = RECORD_OVERHEAD as u64 + 9;

    for cut in 1..=last_record {
        let dir = tempdir().unwrap();
        let journal = dir.path().join("torn");
        {
            let map = created_map(&journal);
            add(&map, "Hello", "world!").unwrap();
            add(&map, "Bye", "baby!").unwrap();
        }

        truncate(&segment_path(dir.path(), "torn"), cut);

        let restored = restored_map(&journal);
        assert_eq!(
            restored.target().data(),
            pairs(&[("Hello", "world!")]),
            "cut of {cut} bytes"
        );
    }
}

#[test]
fn a_torn_journal_reopens_for_writing() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("torn-rw");
    {
        let map = created_map(&journal);
        add(&map, "Hello", "world!").unwrap();
        add(&map, "Bye", "baby!").unwrap();
    }
    truncate(&segment_path(dir.path(), "torn-rw"), 5);

    {
        // The torn tail is truncated away; writing continues.
        let map = reopened_map(&journal);
        assert_eq!(map.target().data(), pairs(&[("Hello", "world!")]));
        add(&map, "foo", "bar").unwrap();
    }

    let restored = restored_map(&journal);
    assert_eq!(
        restored.target().data(),
        pairs(&[("Hello", "world!"), ("foo", "bar")])
    );
}

#[test]
fn corruption_before_the_tail_is_fatal() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("corrupt");
    {
        let map = created_map(&journal);
        add(&map, "Hello", "world!").unwrap();
        add(&map, "Bye", "baby!").unwrap();
    }

    let segment = segment_path(dir.path(), "corrupt");
    let mut bytes = std::fs::read(&segment).unwrap();
    // Flip a byte inside the first record's body.
    let offset = jot_core::MAX_HDRSIZE + jot_core::RECORD_PREFIX_SIZE + 2;
    bytes[offset] ^= 0x20;
    std::fs::write(&segment, &bytes).unwrap();

    let map = Journalled::new(StringMap::new());
    let err = map.restore_from(&rdonly(&journal)).unwrap_err();
    assert!(err.is_corrupted(), "unexpected error: {err}");
    assert_eq!(map.state(), JournalState::Invalid);
}

#[test]
fn a_corrupt_checkpoint_is_fatal() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("badcp");
    {
        let map = created_map(&journal);
        add(&map, "Hello", "world!").unwrap();
        map.take_checkpoint().unwrap();
    }

    let checkpoint = dir.path().join("badcp.checkpoint");
    let mut bytes = std::fs::read(&checkpoint).unwrap();
    let offset = jot_core::MAX_HDRSIZE + 1; // inside the snapshot payload
    bytes[offset] ^= 0x01;
    std::fs::write(&checkpoint, &bytes).unwrap();

    let map = Journalled::new(StringMap::new());
    let err = map.restore_from(&rdonly(&journal)).unwrap_err();
    assert!(err.is_corrupted(), "unexpected error: {err}");
}
