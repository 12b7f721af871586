// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reopen a journal read-write, continue mutating, recover again.

use crate::prelude::*;
use jot_core::test_support::{add, del, pairs};
use tempfile::tempdir;

#[test]
fn checkpoint_then_continue() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("rwtest");

    {
        let map = created_map(&journal);
        add(&map, "Hello", "world!").unwrap();
        add(&map, "Bye", "baby!").unwrap();
        add(&map, "foo", "bar").unwrap();
        add(&map, "bar", "foobar").unwrap();
    }

    {
        // Adopting the journal takes a fresh checkpoint of the restored
        // state, then the new operations land in the new generation.
        let map = reopened_map(&journal);
        assert_eq!(map.target().len(), 4);
        del(&map, "foo").unwrap();
        add(&map, "restaurant", "at").unwrap();
        add(&map, "the", "end").unwrap();
        assert_eq!(map.target().len(), 5);
    }

    let restored = restored_map(&journal);
    assert_eq!(
        restored.target().data(),
        pairs(&[
            ("Hello", "world!"),
            ("Bye", "baby!"),
            ("bar", "foobar"),
            ("restaurant", "at"),
            ("the", "end"),
        ])
    );
}

#[test]
fn several_reopen_rounds_accumulate() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("rounds");

    {
        let map = created_map(&journal);
        add(&map, "foo", "bar").unwrap();
        add(&map, "bar", "foobar").unwrap();
    }
    {
        let map = reopened_map(&journal);
        assert_eq!(map.target().data(), pairs(&[("foo", "bar"), ("bar", "foobar")]));
        add(&map, "Hello", "world!").unwrap();
    }
    {
        let map = reopened_map(&journal);
        add(&map, "Bye", "baby!").unwrap();
    }

    let restored = restored_map(&journal);
    assert_eq!(
        restored.target().data(),
        pairs(&[
            ("foo", "bar"),
            ("bar", "foobar"),
            ("Hello", "world!"),
            ("Bye", "baby!"),
        ])
    );
}
