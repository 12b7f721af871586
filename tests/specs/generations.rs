// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generation monotonicity, checkpoint prefix inclusion, and recovery
//! determinism across checkpoint/write rounds.

use crate::prelude::*;
use jot_core::test_support::{add, del, pairs};
use tempfile::tempdir;

#[test]
fn generations_increase_strictly_across_checkpoints() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("gens");

    let map = created_map(&journal);
    let mut previous = map.generation();
    assert!(previous > 0);

    for round in 0..5 {
        add(&map, &format!("key-{round}"), "value").unwrap();
        let generation = map.take_checkpoint().unwrap();
        assert!(generation > previous, "{generation} <= {previous}");
        previous = generation;
    }
}

#[test]
fn generations_survive_reopen() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("gens-reopen");

    let first;
    {
        let map = created_map(&journal);
        add(&map, "a", "1").unwrap();
        first = map.take_checkpoint().unwrap();
    }
    {
        // Adoption takes its own checkpoint; the generation keeps growing.
        let map = reopened_map(&journal);
        assert!(map.generation() > first);
    }
}

#[test]
fn recovery_reproduces_the_state_after_every_round() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("determinism");

    let map = created_map(&journal);
    let mut expected = pairs(&[]);

    for round in 0..4 {
        let key = format!("round-{round}");
        add(&map, &key, "present").unwrap();
        expected.insert(key, "present".to_string());
        if round % 2 == 0 {
            map.take_checkpoint().unwrap();
        }
        if round == 2 {
            del(&map, "round-0").unwrap();
            expected.remove("round-0");
        }

        // A read-only observer recovers exactly the live state, whether
        // the last mutation went into a checkpoint or a record.
        let observer = restored_map(&journal);
        assert_eq!(observer.target().data(), expected, "round {round}");
        assert_eq!(observer.target().data(), map.target().data());
    }
}

#[test]
fn operations_after_a_checkpoint_live_in_the_new_generation() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("prefix");

    {
        let map = created_map(&journal);
        add(&map, "before", "cp").unwrap();
        map.take_checkpoint().unwrap();
        add(&map, "after", "cp").unwrap();
    }

    // The snapshot holds the prefix, the rest arrives as records of the
    // new generation; together they reproduce the full state.
    let restored = restored_map(&journal);
    assert_eq!(
        restored.target().data(),
        pairs(&[("before", "cp"), ("after", "cp")])
    );
}
