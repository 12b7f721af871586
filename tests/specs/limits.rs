// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation size limits at the submission boundary.

use crate::prelude::*;
use jot_core::test_support::{add, MapOp};
use jot_core::{JournalError, JournalState, MAX_OPSIZE};
use tempfile::tempdir;

#[test]
fn a_body_of_exactly_max_opsize_round_trips() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("bigop");

    // ADD body is "key\nvalue": pick the value so the body is exactly at
    // the limit.
    let value = "v".repeat(MAX_OPSIZE - 2);
    {
        let map = created_map(&journal);
        map.apply(&MapOp::Add {
            key: "k".to_string(),
            value: value.clone(),
        })
        .unwrap();
    }

    let restored = restored_map(&journal);
    let data = restored.target().data();
    assert_eq!(data.len(), 1);
    assert_eq!(data["k"].len(), value.len());
    assert_eq!(data["k"], value);
}

#[test]
fn a_body_over_max_opsize_is_rejected_before_any_write() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("hugeop");

    let map = created_map(&journal);
    add(&map, "small", "fits").unwrap();

    let err = map
        .apply(&MapOp::Add {
            key: "k".to_string(),
            value: "v".repeat(MAX_OPSIZE - 1),
        })
        .unwrap_err();
    assert!(matches!(err, JournalError::BadArg(_)), "unexpected error: {err}");
    // The rejected operation neither poisoned nor got journalled.
    assert_eq!(map.state(), JournalState::Active);
    drop(map);

    let restored = restored_map(&journal);
    assert_eq!(restored.target().data().len(), 1);
}
