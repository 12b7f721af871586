// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two versions of the same opcode coexist in one journal.

use crate::prelude::*;
use jot_core::test_support::{add, add_derived, pairs};
use tempfile::tempdir;

#[test]
fn mixed_op_versions_replay_correctly() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("opvertest");

    {
        let map = created_map(&journal);
        add(&map, "World", "hello!").unwrap();
        add_derived(&map, "Hello").unwrap();
        assert_eq!(
            map.target().data(),
            pairs(&[("Hello", "HELLO-HELLO"), ("World", "hello!")])
        );
    }

    let restored = restored_map(&journal);
    assert_eq!(
        restored.target().data(),
        pairs(&[("Hello", "HELLO-HELLO"), ("World", "hello!")])
    );
}

#[test]
fn derived_adds_survive_checkpoints_too() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("opvercp");

    {
        let map = created_map(&journal);
        add_derived(&map, "one").unwrap();
        map.take_checkpoint().unwrap();
        add_derived(&map, "two").unwrap();
    }

    let restored = restored_map(&journal);
    assert_eq!(
        restored.target().data(),
        pairs(&[("one", "ONE-ONE"), ("two", "TWO-TWO")])
    );
}
