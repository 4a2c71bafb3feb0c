//! Per-tip derived state.
//!
//! Every block in the tree carries an immutable snapshot of the world as of
//! that block: ink balances, the live canvas, the delayed-validation queue
//! and the op log. Snapshots are derived functionally from the parent
//! snapshot plus the new block and are never mutated once published.

use crate::block::{Block, BlockHash, Op, OpHash};
use crate::crypto::PubKeyHex;
use crate::directory::NetSettings;
use crate::shape::{Canvas, Shape};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;

/// A shape committed to the live canvas, keyed by its add-op hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasEntry {
    pub shape: Shape,
    /// Hash of the block that carried the add op.
    pub block_hash: BlockHash,
}

/// An op past inclusion but before confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOp {
    pub op: Op,
    /// Confirmations still required before the op touches the canvas.
    pub remaining: u8,
    /// Hash of the block that carried the op.
    pub block_hash: BlockHash,
}

/// The derived snapshot at one chain node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TipState {
    /// Ink balance per public key.
    pub ink: HashMap<PubKeyHex, u32>,
    /// Committed, visible shapes keyed by add-op hash.
    pub canvas: HashMap<OpHash, CanvasEntry>,
    /// Ops waiting out their confirmation depth, keyed by op hash.
    pub pending: HashMap<OpHash, PendingOp>,
    /// Every op from genesis to this node, keyed by op hash.
    pub op_log: HashMap<OpHash, Op>,
}

impl TipState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ink_of(&self, pubkey: &str) -> u32 {
        self.ink.get(pubkey).copied().unwrap_or(0)
    }

    /// The drawn-shape set for overlap validation at this tip.
    pub fn canvas_view(&self, settings: &NetSettings) -> Canvas {
        Canvas {
            shapes: self.canvas.values().map(|e| e.shape.clone()).collect(),
            x_max: settings.canvas.canvas_x_max,
            y_max: settings.canvas.canvas_y_max,
        }
    }

    /// Whether a pending delete already targets the add op `add_hash`.
    pub fn delete_pending_for(&self, add_hash: &str) -> bool {
        self.pending
            .values()
            .any(|p| !p.op.add && p.op.with_add(true).hash_hex() == add_hash)
    }

    /// Derive the child snapshot for `block`. The block must already have
    /// been validated against this (the parent) snapshot.
    pub fn apply_block(&self, block: &Block, settings: &NetSettings) -> TipState {
        let mut next = self.clone();
        let block_hash = block.hash();

        next.commit_matured();

        for op in block.ops() {
            let op_hash = op.hash_hex();
            next.pending.insert(
                op_hash.clone(),
                PendingOp {
                    op: op.clone(),
                    remaining: op.validate_num,
                    block_hash: block_hash.clone(),
                },
            );
            next.op_log.insert(op_hash, op.clone());
        }

        let reward = settings.block_reward(block.is_op_block());
        *next.ink.entry(block.miner_pubkey().clone()).or_insert(0) += reward;

        next
    }

    /// Tick every pending entry down one confirmation and commit those that
    /// reach zero: adds install onto the canvas and debit ink, deletes
    /// remove the matching add entry and refund ink.
    fn commit_matured(&mut self) {
        let mut matured = Vec::new();
        for (op_hash, entry) in self.pending.iter_mut() {
            entry.remaining = entry.remaining.saturating_sub(1);
            if entry.remaining == 0 {
                matured.push(op_hash.clone());
            }
        }

        for op_hash in matured {
            let Some(entry) = self.pending.remove(&op_hash) else {
                continue;
            };

            let cost = match entry.op.shape.area() {
                Ok(area) => area as u32,
                Err(err) => {
                    // unreachable for ops that passed validation
                    error!(op = %op_hash, %err, "invariant violated: committed op has no area");
                    0
                }
            };

            let ink = self.ink.entry(entry.op.pubkey.clone()).or_insert(0);
            if entry.op.add {
                *ink = ink.saturating_sub(cost);
                self.canvas.insert(
                    op_hash,
                    CanvasEntry {
                        shape: entry.op.shape.clone(),
                        block_hash: entry.block_hash,
                    },
                );
            } else {
                *ink += cost;
                let add_hash = entry.op.with_add(true).hash_hex();
                self.canvas.remove(&add_hash);
            }
        }
    }
}
