// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failures inside take_checkpoint: the in-progress checkpoint is never
//! adopted; the previous generation stays authoritative.

use crate::prelude::*;
use jot_core::test_support::{add, pairs, Stage};
use jot_core::JournalState;
use tempfile::tempdir;

#[test]
fn crash_inside_save_checkpoint_is_rolled_back() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("cpfail");

    {
        let map = created_map(&journal);
        add(&map, "Hello", "world!").unwrap();
        let committed = map.take_checkpoint().unwrap();
        add(&map, "Bye", "baby!").unwrap();

        map.target().fail_at(Stage::SaveCheckpoint);
        map.take_checkpoint().unwrap_err();
        assert_eq!(map.state(), JournalState::Active);
        assert_eq!(map.generation(), committed);

        // The journal keeps accepting operations after the rollback.
        add(&map, "foo", "bar").unwrap();
    }

    // No half-written checkpoint was left behind.
    assert!(!dir.path().join("cpfail.checkpoint.tmp").exists());

    // Everything applied before and around the failed checkpoint is there.
    let restored = restored_map(&journal);
    assert_eq!(
        restored.target().data(),
        pairs(&[("Hello", "world!"), ("Bye", "baby!"), ("foo", "bar")])
    );
}

#[test]
fn failed_start_checkpoint_leaves_storage_untouched() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("cpstart");

    {
        let map = created_map(&journal);
        add(&map, "Hello", "world!").unwrap();
        let generation = map.generation();

        map.target().fail_at(Stage::StartCheckpoint);
        map.take_checkpoint().unwrap_err();
        assert_eq!(map.state(), JournalState::Active);
        assert_eq!(map.generation(), generation);

        // And a later checkpoint works.
        let committed = map.take_checkpoint().unwrap();
        assert!(committed > generation);
    }

    let restored = restored_map(&journal);
    assert_eq!(restored.target().data(), pairs(&[("Hello", "world!")]));
}

#[test]
fn a_checkpoint_after_a_failed_one_commits() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("cpretry");

    {
        let map = created_map(&journal);
        add(&map, "one", "1").unwrap();
        map.target().fail_at(Stage::SaveCheckpoint);
        map.take_checkpoint().unwrap_err();

        add(&map, "two", "2").unwrap();
        map.take_checkpoint().unwrap();
        add(&map, "three", "3").unwrap();
    }

    let restored = restored_map(&journal);
    assert_eq!(
        restored.target().data(),
        pairs(&[("one", "1"), ("two", "2"), ("three", "3")])
    );
}
