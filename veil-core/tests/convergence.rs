//! Convergence properties of the text replica.
//!
//! Several replicas edit concurrently; their changes are then exchanged in
//! different orders. Every order must materialize to the same delta.

use proptest::prelude::*;
use serde_json::json;
use veil_core::{Attributes, DeltaOp, TextCrdt, TextReplica};

#[derive(Debug, Clone)]
enum Edit {
    Insert(u16, String),
    Delete(u16),
    Bold(u16),
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (any::<u16>(), "[a-z ]{1,4}").prop_map(|(at, s)| Edit::Insert(at, s)),
        any::<u16>().prop_map(Edit::Delete),
        any::<u16>().prop_map(Edit::Bold),
    ]
}

fn bold() -> Attributes {
    serde_json::from_value(json!({"bold": true})).unwrap()
}

/// Translate an edit into a delta valid for a text of length `len`.
fn to_delta(edit: &Edit, len: u32) -> Vec<DeltaOp> {
    match edit {
        Edit::Insert(at, s) => {
            let at = u32::from(*at) % (len + 1);
            vec![DeltaOp::retain(at), DeltaOp::insert(s.as_str())]
        }
        Edit::Delete(at) if len > 0 => {
            vec![DeltaOp::retain(u32::from(*at) % len), DeltaOp::delete(1)]
        }
        Edit::Bold(at) if len > 0 => {
            let at = u32::from(*at) % len;
            vec![DeltaOp::retain(at), DeltaOp::retain_with(1, bold())]
        }
        _ => Vec::new(),
    }
}

/// Run the edits round-robin over `replicas` replicas that share the
/// initial document, returning every change produced.
fn concurrent_changes(edits: &[(usize, Edit)], replicas: usize) -> (Vec<u8>, Vec<Vec<u8>>) {
    let (first, init) = TextReplica::new_document().unwrap();
    let mut peers = vec![first];
    for _ in 1..replicas {
        peers.push(TextReplica::from_changes([init.payload.as_slice()]).unwrap());
    }

    let mut changes = Vec::new();
    for (who, edit) in edits {
        let peer = &mut peers[who % replicas];
        let delta = to_delta(edit, peer.len());
        if let Some(change) = peer.apply_delta(&delta).unwrap() {
            changes.push(change);
        }
    }
    (init.payload, changes)
}

fn materialize(init: &[u8], changes: &[&Vec<u8>]) -> Vec<DeltaOp> {
    let mut replica = TextReplica::init();
    replica.apply_changes(&[init]).unwrap();
    let refs: Vec<&[u8]> = changes.iter().map(|c| c.as_slice()).collect();
    replica.apply_changes(&refs).unwrap();
    replica.to_delta()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_order_independent(
        (init, changes, shuffled) in prop::collection::vec((0usize..3, arb_edit()), 1..24)
            .prop_flat_map(|edits| {
                let (init, changes) = concurrent_changes(&edits, 3);
                (Just(init), Just(changes.clone()), Just(changes).prop_shuffle())
            }),
    ) {
        let forward: Vec<&Vec<u8>> = changes.iter().collect();
        let shuffled: Vec<&Vec<u8>> = shuffled.iter().collect();
        prop_assert_eq!(materialize(&init, &shuffled), materialize(&init, &forward));
    }

    #[test]
    fn prop_deletes_reach_peer(
        seed in "[a-z]{4,12}",
        edits in prop::collection::vec(prop_oneof![
            3 => any::<u16>().prop_map(Edit::Delete),
            1 => (any::<u16>(), "[a-z]{1,3}").prop_map(|(at, s)| Edit::Insert(at, s)),
        ], 1..16),
    ) {
        let (mut local, init) = TextReplica::new_document().unwrap();
        let seeded = local.apply_delta(&[DeltaOp::insert(seed.as_str())]).unwrap().unwrap();
        let mut peer = TextReplica::from_changes([init.payload.as_slice(), seeded.as_slice()]).unwrap();

        for edit in &edits {
            let before = local.text();
            let delta = to_delta(edit, local.len());
            let change = local.apply_delta(&delta).unwrap();
            if local.text() != before {
                let change = change.expect("visible edit recorded as a change");
                peer.apply_changes(&[&change]).unwrap();
            }
            prop_assert_eq!(peer.to_delta(), local.to_delta());
        }
    }

    #[test]
    fn prop_duplicate_changes_are_idempotent(
        edits in prop::collection::vec((0usize..2, arb_edit()), 1..16),
    ) {
        let (init, changes) = concurrent_changes(&edits, 2);

        let once: Vec<&Vec<u8>> = changes.iter().collect();
        let twice: Vec<&Vec<u8>> = changes.iter().chain(changes.iter()).collect();
        prop_assert_eq!(materialize(&init, &twice), materialize(&init, &once));
    }

    #[test]
    fn prop_delta_roundtrip(
        edits in prop::collection::vec((Just(0usize), arb_edit()), 1..24),
    ) {
        let (init, changes) = concurrent_changes(&edits, 1);
        let all: Vec<&Vec<u8>> = changes.iter().collect();
        let delta = materialize(&init, &all);

        let mut copy = TextReplica::new();
        copy.apply_delta(&delta).unwrap();
        prop_assert_eq!(copy.to_delta(), delta);
    }
}

#[test]
fn test_concurrent_insert_same_offset_has_one_order() {
    let (mut a, init) = TextReplica::new_document().unwrap();
    let mut b = TextReplica::from_changes([init.payload.as_slice()]).unwrap();

    let ca = a.apply_delta(&[DeltaOp::insert("A")]).unwrap().unwrap();
    let cb = b.apply_delta(&[DeltaOp::insert("B")]).unwrap().unwrap();

    a.apply_changes(&[&cb]).unwrap();
    b.apply_changes(&[&ca]).unwrap();

    let text = a.text();
    assert_eq!(text, b.text());
    assert!(text == "AB\n" || text == "BA\n");
}

#[test]
fn test_concurrent_format_and_delete() {
    let (mut a, init) = TextReplica::new_document().unwrap();
    let seed = a.apply_delta(&[DeltaOp::insert("abc")]).unwrap().unwrap();
    let mut b = TextReplica::from_changes([init.payload.as_slice(), seed.as_slice()]).unwrap();

    let ca = a
        .apply_delta(&[DeltaOp::retain_with(3, bold())])
        .unwrap()
        .unwrap();
    let cb = b
        .apply_delta(&[DeltaOp::retain(1), DeltaOp::delete(1)])
        .unwrap()
        .unwrap();

    a.apply_changes(&[&cb]).unwrap();
    b.apply_changes(&[&ca]).unwrap();

    assert_eq!(a.to_delta(), b.to_delta());
    assert_eq!(
        a.to_delta(),
        vec![DeltaOp::insert_with("ac", bold()), DeltaOp::insert("\n")]
    );
}

#[test]
fn test_late_dependency_is_integrated() {
    let (mut a, init) = TextReplica::new_document().unwrap();
    let first = a.apply_delta(&[DeltaOp::insert("x")]).unwrap().unwrap();
    let second = a
        .apply_delta(&[DeltaOp::retain(1), DeltaOp::insert("y")])
        .unwrap()
        .unwrap();

    let mut b = TextReplica::new();
    b.apply_changes(&[&second]).unwrap();
    b.apply_changes(&[&first, &init.payload]).unwrap();
    assert_eq!(b.text(), "xy\n");
}
