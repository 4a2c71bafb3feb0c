//! Static validation of ops and blocks against a tip snapshot.

use crate::block::{zero_prefix, Block, Op};
use crate::chain::state::TipState;
use crate::crypto::verify_signature;
use crate::directory::NetSettings;
use crate::error::{ChainError, Result};

/// Validate an op against a snapshot.
///
/// Checks, in order: the signature over the shape's content hash, replay
/// against the snapshot's op log, then per-kind rules. An add needs ink
/// cover and a canvas-valid shape; a delete needs its matching add on the
/// canvas and no delete already in flight for it.
pub fn validate_op(op: &Op, state: &TipState, settings: &NetSettings) -> Result<()> {
    verify_signature(&op.pubkey, &op.shape.content_hash(), &op.sig)?;

    let op_hash = op.hash_hex();
    if state.op_log.contains_key(&op_hash) {
        return Err(ChainError::InvalidOp(format!(
            "operation already in chain [{}]",
            op_hash
        )));
    }

    if op.add {
        let cost = op.shape.area()? as u32;
        let ink = state.ink_of(&op.pubkey);
        if cost > ink {
            return Err(ChainError::InsufficientInk(ink));
        }

        op.shape.validate(&state.canvas_view(settings))?;
    } else {
        let add_hash = op.with_add(true).hash_hex();
        if !state.canvas.contains_key(&add_hash) {
            return Err(ChainError::InvalidShapeHash(add_hash));
        }
        if state.delete_pending_for(&add_hash) {
            return Err(ChainError::InvalidOp(format!(
                "shape already queued for delete [{}]",
                add_hash
            )));
        }
    }

    Ok(())
}

/// Validate a block whose parent snapshot is known.
///
/// The parent-existence check lives in the store (a missing parent parks
/// the block as an orphan rather than failing); here the block's hash must
/// satisfy the zero-prefix rule for its kind and every contained op must
/// validate against the parent snapshot, which is what makes ink
/// accounting deterministic across miners.
pub fn validate_block(block: &Block, parent_state: &TipState, settings: &NetSettings) -> Result<()> {
    let difficulty = settings.pow_difficulty(block.is_op_block());
    if !zero_prefix(&block.hash(), difficulty) {
        return Err(ChainError::InvalidBlockHash(format!(
            "invalid nonce for block [{}]",
            block.hash()
        )));
    }

    if block.is_op_block() && block.ops().is_empty() {
        return Err(ChainError::InvalidBlock(
            "op block must contain operations".to_string(),
        ));
    }

    for op in block.ops() {
        validate_op(op, parent_state, settings)?;
    }

    Ok(())
}
