// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the behavioral specs.

use jot_core::test_support::StringMap;
use jot_core::{AccMode, Journalled, OpenFlags, Port};
use jot_storage::FileStorage;
use std::path::Path;

/// `MD_WRONLY | OF_CREAT`: start a fresh journal.
pub fn wronly(journal: &Path) -> Port {
    let storage = FileStorage::open(
        journal,
        AccMode::WriteOnly,
        OpenFlags {
            create: true,
            ..OpenFlags::default()
        },
    )
    .unwrap();
    Port::new(Box::new(storage))
}

/// `MD_RDWR`: open an existing journal for replay and further writing.
pub fn rdwr(journal: &Path) -> Port {
    let storage = FileStorage::open(journal, AccMode::ReadWrite, OpenFlags::default()).unwrap();
    Port::new(Box::new(storage))
}

/// `MD_RDONLY`: open an existing journal for replay only.
pub fn rdonly(journal: &Path) -> Port {
    let storage = FileStorage::open(journal, AccMode::ReadOnly, OpenFlags::default()).unwrap();
    Port::new(Box::new(storage))
}

/// `MD_RDONLY | OF_NOSEGDIR`: replay, looking segments up next to the
/// checkpoint regardless of any segments-directory link.
pub fn rdonly_nosegdir(journal: &Path) -> Port {
    let storage = FileStorage::open(
        journal,
        AccMode::ReadOnly,
        OpenFlags {
            no_segments_dir: true,
            ..OpenFlags::default()
        },
    )
    .unwrap();
    Port::new(Box::new(storage))
}

/// Attach a fresh string map to a fresh journal.
pub fn created_map(journal: &Path) -> Journalled<StringMap> {
    let map = Journalled::new(StringMap::new());
    map.set_journal(wronly(journal)).unwrap();
    map
}

/// Restore a string map from the journal, read-only.
pub fn restored_map(journal: &Path) -> Journalled<StringMap> {
    let map = Journalled::new(StringMap::new());
    map.restore_from(&rdonly(journal)).unwrap();
    map
}

/// Restore a string map and adopt the journal for further writing.
pub fn reopened_map(journal: &Path) -> Journalled<StringMap> {
    let map = Journalled::new(StringMap::new());
    let port = rdwr(journal);
    map.restore_from(&port).unwrap();
    map.set_journal(port).unwrap();
    map
}

/// Sorted file names in a directory.
pub fn ls(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .collect();
    names.sort();
    names
}
