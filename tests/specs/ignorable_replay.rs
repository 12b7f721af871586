// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A journalled operation that fails on apply, ignorably: the record is
//! on disk, the original submit reports the failure without poisoning,
//! and replay skips the record.

use crate::prelude::*;
use jot_core::test_support::{add, del, pairs};
use jot_core::JournalState;
use tempfile::tempdir;

#[test]
fn ignorable_failure_replays_as_a_silent_success() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("ignorable");

    {
        let map = created_map(&journal);
        add(&map, "Hello", "world!").unwrap();

        let err = del(&map, "absent").unwrap_err();
        assert!(err.is_op_error(), "unexpected error: {err}");
        // Still alive: the failed operation left the map consistent.
        assert_eq!(map.state(), JournalState::Active);

        add(&map, "Bye", "baby!").unwrap();
    }

    let restored = restored_map(&journal);
    assert_eq!(
        restored.target().data(),
        pairs(&[("Hello", "world!"), ("Bye", "baby!")])
    );
}

#[test]
fn ignorable_failure_before_a_checkpoint_round_trips() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("ignorable2");

    {
        let map = created_map(&journal);
        let _ = del(&map, "nothing-here");
        add(&map, "a", "1").unwrap();
        map.take_checkpoint().unwrap();
        let _ = del(&map, "still-nothing");
        add(&map, "b", "2").unwrap();
    }

    let restored = restored_map(&journal);
    assert_eq!(restored.target().data(), pairs(&[("a", "1"), ("b", "2")]));
}

#[test]
fn deleting_an_existing_key_is_not_an_error() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("del-ok");

    {
        let map = created_map(&journal);
        add(&map, "doomed", "value").unwrap();
        del(&map, "doomed").unwrap();
    }

    let restored = restored_map(&journal);
    assert!(restored.target().is_empty());
}
