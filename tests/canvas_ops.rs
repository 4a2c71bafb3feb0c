//! Ink accounting and canvas lifecycle through the chain store: add ops
//! commit after validate-num confirmations, deletes refund ink, and the
//! cross-owner overlap policy holds on the induced canvas.

use blockart::block::{Block, NoOpBlock, Op, OpBlock};
use blockart::chain::{BlockIngest, ChainStore, OpIngest};
use blockart::crypto::KeyPair;
use blockart::directory::{CanvasSettings, NetSettings};
use blockart::error::ChainError;
use blockart::shape::Shape;
use blockart::svg::ShapeKind;

const INK_PER_OP_BLOCK: u32 = 50;
const INK_PER_NO_OP_BLOCK: u32 = 25;

fn test_settings() -> NetSettings {
    NetSettings {
        genesis_block_hash: "83218ac34c1834c26781fe4bde918ee4".to_string(),
        min_peer_connections: 1,
        ink_per_op_block: INK_PER_OP_BLOCK,
        ink_per_no_op_block: INK_PER_NO_OP_BLOCK,
        heartbeat_ms: 1000,
        pow_difficulty_op_block: 0,
        pow_difficulty_no_op_block: 0,
        canvas: CanvasSettings {
            canvas_x_max: 1024,
            canvas_y_max: 1024,
        },
    }
}

fn ready_store() -> ChainStore {
    let mut store = ChainStore::new(test_settings());
    store.finish_init();
    store
}

fn signed_op(keypair: &KeyPair, svg: &str, fill: &str, stroke: &str, validate_num: u8) -> Op {
    let shape = Shape {
        owner: keypair.public_key_hex(),
        kind: ShapeKind::Path,
        svg: svg.to_string(),
        fill: fill.to_string(),
        stroke: stroke.to_string(),
    };
    let sig = keypair.sign(&shape.content_hash()).unwrap();
    Op {
        add: true,
        shape,
        sig,
        pubkey: keypair.public_key_hex(),
        validate_num,
    }
}

/// Mine the next block on the current tip: an op block when the queue has
/// ops, a no-op block otherwise. Difficulty is zero so any nonce works.
fn mine_next(store: &mut ChainStore, miner: &KeyPair, nonce: u32) -> String {
    let (parent, ops) = store.mining_snapshot();
    let block = if ops.is_empty() {
        Block::NoOp(NoOpBlock {
            prev_hash: parent,
            miner_pubkey: miner.public_key_hex(),
            nonce,
        })
    } else {
        Block::Op(OpBlock {
            prev_hash: parent,
            ops,
            miner_pubkey: miner.public_key_hex(),
            nonce,
        })
    };
    match store.ingest_block(block).unwrap() {
        BlockIngest::Inserted { hash, .. } => hash,
        other => panic!("expected insert, got {:?}", other),
    }
}

#[test]
fn add_then_delete_returns_ink_on_commit() {
    let mut store = ready_store();
    let miner = KeyPair::generate();
    let me = miner.public_key_hex();

    // earn ink with two no-op blocks
    mine_next(&mut store, &miner, 1);
    mine_next(&mut store, &miner, 2);
    assert_eq!(store.ink_of(&me), 2 * INK_PER_NO_OP_BLOCK);

    let op = signed_op(&miner, "M 10 10 v 5 h 8 z", "transparent", "red", 2);
    let op_hash = op.hash_hex();
    let area = op.shape.area().unwrap() as u32;
    assert!(matches!(
        store.submit_op(op.clone()).unwrap(),
        OpIngest::Queued(_)
    ));

    // the op rides the next mined block
    let carrier = mine_next(&mut store, &miner, 3);
    assert!(store.get_shapes(&carrier).unwrap().contains(&op_hash));
    assert!(store.canvas_entry(&op_hash).is_none());

    // one confirmation down, one to go; ink untouched before commit
    mine_next(&mut store, &miner, 4);
    assert!(store.canvas_entry(&op_hash).is_none());
    let ink_before_commit = store.ink_of(&me);

    // second confirmation commits: shape lands on the canvas, ink debits
    mine_next(&mut store, &miner, 5);
    let entry = store.canvas_entry(&op_hash).expect("shape committed");
    assert_eq!(entry.block_hash, carrier);
    assert_eq!(
        store.ink_of(&me),
        ink_before_commit + INK_PER_NO_OP_BLOCK - area
    );
    let ink_after_add = store.ink_of(&me);

    // delete: the stored add op with the flag flipped
    let delete = op.with_add(false);
    assert!(matches!(
        store.submit_op(delete).unwrap(),
        OpIngest::Queued(_)
    ));
    mine_next(&mut store, &miner, 6);
    // between add commit and delete commit the balance stays debited
    assert!(store.canvas_entry(&op_hash).is_some());
    assert_eq!(
        store.ink_of(&me),
        ink_after_add + INK_PER_OP_BLOCK
    );

    mine_next(&mut store, &miner, 7);
    mine_next(&mut store, &miner, 8);

    // delete committed: canvas entry gone, area refunded
    assert!(store.canvas_entry(&op_hash).is_none());
    assert_eq!(
        store.ink_of(&me),
        ink_after_add + INK_PER_OP_BLOCK + 2 * INK_PER_NO_OP_BLOCK + area
    );

    // the deleted shape still renders, white on white, from the op log
    let fields = store.get_svg_fields(&op_hash).unwrap();
    assert!(fields.contains("white"));
}

#[test]
fn ink_totals_balance_against_rewards_and_commits() {
    let mut store = ready_store();
    let miner = KeyPair::generate();

    mine_next(&mut store, &miner, 1);
    mine_next(&mut store, &miner, 2);

    let op = signed_op(&miner, "M 10 10 v 5 h 8 z", "transparent", "red", 1);
    let area = op.shape.area().unwrap() as u32;
    store.submit_op(op).unwrap();
    mine_next(&mut store, &miner, 3);
    mine_next(&mut store, &miner, 4);

    // rewards: 3 no-op + 1 op block; commits: one add of `area`
    let expected = 3 * INK_PER_NO_OP_BLOCK + INK_PER_OP_BLOCK - area;
    let total: u32 = store.tip_state().ink.values().sum();
    assert_eq!(total, expected);
}

#[test]
fn pending_remaining_tracks_confirmations() {
    let mut store = ready_store();
    let miner = KeyPair::generate();

    mine_next(&mut store, &miner, 1);
    mine_next(&mut store, &miner, 2);

    let validate_num = 3u8;
    let op = signed_op(&miner, "M 10 10 v 5 h 8 z", "transparent", "red", validate_num);
    let op_hash = op.hash_hex();
    store.submit_op(op).unwrap();
    mine_next(&mut store, &miner, 3);

    for confirmations in 1..u32::from(validate_num) {
        mine_next(&mut store, &miner, 100 + confirmations);
        let state = store.tip_state();
        if let Some(pending) = state.pending.get(&op_hash) {
            assert_eq!(
                u32::from(validate_num) - u32::from(pending.remaining),
                confirmations
            );
        } else {
            panic!("op should still be pending");
        }
    }

    mine_next(&mut store, &miner, 200);
    assert!(store.tip_state().pending.is_empty());
    assert!(store.canvas_entry(&op_hash).is_some());
}

#[test]
fn same_shape_other_owner_is_overlap() {
    let mut store = ready_store();
    let owner1 = KeyPair::generate();
    let owner2 = KeyPair::generate();

    // both owners earn ink
    mine_next(&mut store, &owner1, 1);
    mine_next(&mut store, &owner2, 2);
    mine_next(&mut store, &owner1, 3);
    mine_next(&mut store, &owner2, 4);

    // owner1 draws and confirms
    let op = signed_op(&owner1, "M 10 10 v 5 h 8 z", "red", "blue", 1);
    store.submit_op(op).unwrap();
    mine_next(&mut store, &owner1, 5);
    mine_next(&mut store, &owner1, 6);

    // owner2 submits the identical description
    let clash = signed_op(&owner2, "M 10 10 v 5 h 8 z", "green", "yellow", 1);
    let err = store.submit_op(clash).unwrap_err();
    assert!(matches!(err, ChainError::ShapeOverlap(_)));

    // owner1 drawing over their own shape is allowed
    let own_again = signed_op(&owner1, "M 10 10 v 5 h 8 z", "green", "yellow", 1);
    assert!(matches!(
        store.submit_op(own_again).unwrap(),
        OpIngest::Queued(_)
    ));
}

#[test]
fn resubmitted_op_is_already_known() {
    let mut store = ready_store();
    let miner = KeyPair::generate();

    mine_next(&mut store, &miner, 1);
    mine_next(&mut store, &miner, 2);

    let op = signed_op(&miner, "M 10 10 v 5 h 8 z", "transparent", "red", 1);

    assert!(matches!(
        store.submit_op(op.clone()).unwrap(),
        OpIngest::Queued(_)
    ));
    // second offer hits the mining queue
    assert_eq!(store.submit_op(op.clone()).unwrap(), OpIngest::AlreadyKnown);

    mine_next(&mut store, &miner, 3);
    // after inclusion the op log stops it instead
    assert_eq!(store.submit_op(op).unwrap(), OpIngest::AlreadyKnown);
}

#[test]
fn insufficient_ink_blocks_submission() {
    let mut store = ready_store();
    let pauper = KeyPair::generate();

    let op = signed_op(&pauper, "M 10 10 v 5 h 8 z", "transparent", "red", 1);
    let err = store.submit_op(op).unwrap_err();
    assert!(matches!(err, ChainError::InsufficientInk(0)));
}
