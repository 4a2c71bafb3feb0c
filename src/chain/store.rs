//! The block tree and fork choice.
//!
//! One [`ChainNode`] exists per known block hash; nodes are never deleted,
//! so forks persist. The current tip is the deepest known node, with an
//! equal-depth tie broken by a coin flip at each arrival. Blocks whose
//! parent is unknown wait in an orphan map until the parent shows up.

use crate::block::{Block, BlockHash, NoOpBlock, Op, OpHash};
use crate::chain::state::{CanvasEntry, TipState};
use crate::chain::validation::{validate_block, validate_op};
use crate::directory::NetSettings;
use crate::error::{ChainError, Result};
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::debug;

/// A block linked into the tree together with its derived snapshot.
#[derive(Debug, Clone)]
pub struct ChainNode {
    pub block: Block,
    pub children: Vec<BlockHash>,
    /// Depth from genesis; genesis is 0.
    pub depth: u64,
    pub state: TipState,
}

/// Outcome of offering a block to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockIngest {
    /// Linked into the tree; `new_tip` reports whether the tip moved.
    Inserted { hash: BlockHash, new_tip: bool },
    /// Already linked; produces no state change.
    AlreadyKnown,
    /// Parent unknown; parked in the orphan map.
    MissingParent,
    /// Arrived while the join handshake is still running; parked until
    /// initialization completes.
    HeldForInit,
}

/// Outcome of offering an op to the mining queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpIngest {
    Queued(OpHash),
    /// Already in the op log or the queue; produces no state change.
    AlreadyKnown,
}

pub struct ChainStore {
    settings: NetSettings,
    tree: HashMap<BlockHash, ChainNode>,
    tip: BlockHash,
    /// Blocks whose parent is unknown, keyed by their own hash.
    orphans: HashMap<BlockHash, Block>,
    /// Valid ops waiting to be mined, keyed by op hash.
    mining_queue: HashMap<OpHash, Op>,
    /// Blocks received before the join handshake finished.
    init_wait_queue: Vec<Block>,
    initializing: bool,
    tip_tx: watch::Sender<BlockHash>,
}

impl ChainStore {
    /// Seed a genesis-only tree with an empty snapshot. The store starts in
    /// the initializing state; [`ChainStore::finish_init`] opens it for
    /// gossip once the join handshake has run.
    pub fn new(settings: NetSettings) -> Self {
        let genesis_hash = settings.genesis_block_hash.clone();
        let genesis = ChainNode {
            block: Block::NoOp(NoOpBlock {
                prev_hash: String::new(),
                miner_pubkey: String::new(),
                nonce: 0,
            }),
            children: Vec::new(),
            depth: 0,
            state: TipState::new(),
        };

        let mut tree = HashMap::new();
        tree.insert(genesis_hash.clone(), genesis);

        let (tip_tx, _) = watch::channel(genesis_hash.clone());

        ChainStore {
            settings,
            tree,
            tip: genesis_hash,
            orphans: HashMap::new(),
            mining_queue: HashMap::new(),
            init_wait_queue: Vec::new(),
            initializing: true,
            tip_tx,
        }
    }

    pub fn settings(&self) -> &NetSettings {
        &self.settings
    }

    pub fn genesis_hash(&self) -> &BlockHash {
        &self.settings.genesis_block_hash
    }

    pub fn tip_hash(&self) -> &BlockHash {
        &self.tip
    }

    fn tip_node(&self) -> &ChainNode {
        self.tree.get(&self.tip).expect("tip is always linked")
    }

    pub fn tip_state(&self) -> &TipState {
        &self.tip_node().state
    }

    pub fn tip_depth(&self) -> u64 {
        self.tip_node().depth
    }

    /// Subscribe to tip changes; the channel carries the new tip hash.
    pub fn subscribe_tip(&self) -> watch::Receiver<BlockHash> {
        self.tip_tx.subscribe()
    }

    pub fn contains_block(&self, hash: &str) -> bool {
        self.tree.contains_key(hash)
    }

    /// Depth from genesis of a linked block.
    pub fn node_depth(&self, hash: &str) -> Option<u64> {
        self.tree.get(hash).map(|node| node.depth)
    }

    // ------------------------------------------------------------------
    // Op and block ingestion
    // ------------------------------------------------------------------

    /// Offer an op for mining. Re-offering a known op is a no-op, which is
    /// what stops gossip flood-back cycles and replay.
    pub fn submit_op(&mut self, op: Op) -> Result<OpIngest> {
        let op_hash = op.hash_hex();
        if self.mining_queue.contains_key(&op_hash)
            || self.tip_state().op_log.contains_key(&op_hash)
        {
            return Ok(OpIngest::AlreadyKnown);
        }

        validate_op(&op, self.tip_state(), &self.settings)?;
        self.mining_queue.insert(op_hash.clone(), op);
        Ok(OpIngest::Queued(op_hash))
    }

    /// Offer a block from gossip. Parked while initializing; otherwise
    /// validated and linked.
    pub fn ingest_block(&mut self, block: Block) -> Result<BlockIngest> {
        if self.initializing {
            self.init_wait_queue.push(block);
            return Ok(BlockIngest::HeldForInit);
        }
        self.ingest_block_now(block)
    }

    /// Validate and link a block regardless of the initializing gate. Used
    /// by the join handshake and the init-queue flush.
    pub fn ingest_block_now(&mut self, block: Block) -> Result<BlockIngest> {
        let hash = block.hash();
        if self.tree.contains_key(&hash) {
            return Ok(BlockIngest::AlreadyKnown);
        }

        // the zero-prefix rule gates orphan parking as well
        let difficulty = self.settings.pow_difficulty(block.is_op_block());
        if !crate::block::zero_prefix(&hash, difficulty) {
            return Err(ChainError::InvalidBlockHash(format!(
                "invalid nonce for block [{}]",
                hash
            )));
        }

        let parent_hash = block.prev_hash().clone();
        let Some(parent) = self.tree.get(&parent_hash) else {
            debug!(block = %hash, parent = %parent_hash, "parking orphan block");
            self.orphans.insert(hash, block);
            return Ok(BlockIngest::MissingParent);
        };

        validate_block(&block, &parent.state, &self.settings)?;

        let state = parent.state.apply_block(&block, &self.settings);
        let depth = parent.depth + 1;

        for op in block.ops() {
            self.mining_queue.remove(&op.hash_hex());
        }

        if let Some(parent) = self.tree.get_mut(&parent_hash) {
            parent.children.push(hash.clone());
        }
        self.tree.insert(
            hash.clone(),
            ChainNode {
                block,
                children: Vec::new(),
                depth,
                state,
            },
        );

        let new_tip = self.maybe_adopt_tip(&hash, depth);
        Ok(BlockIngest::Inserted { hash, new_tip })
    }

    /// Deepest node wins; equal depth is a coin flip per arrival.
    fn maybe_adopt_tip(&mut self, hash: &BlockHash, depth: u64) -> bool {
        let tip_depth = self.tip_depth();

        let adopt = if depth > tip_depth {
            true
        } else if depth == tip_depth {
            rand::random::<bool>()
        } else {
            false
        };

        if adopt {
            debug!(old = %self.tip, new = %hash, depth, "tip moved");
            self.tip = hash.clone();
            self.tip_tx.send_replace(hash.clone());
        }
        adopt
    }

    // ------------------------------------------------------------------
    // Initialization gate
    // ------------------------------------------------------------------

    pub fn is_initializing(&self) -> bool {
        self.initializing
    }

    /// Leave the initializing state and hand back the blocks parked during
    /// the join handshake so they can be re-offered.
    pub fn finish_init(&mut self) -> Vec<Block> {
        self.initializing = false;
        std::mem::take(&mut self.init_wait_queue)
    }

    // ------------------------------------------------------------------
    // Orphan resolution
    // ------------------------------------------------------------------

    /// Remove and return parked blocks whose parent is now linked.
    pub fn ready_orphans(&mut self) -> Vec<Block> {
        let ready: Vec<BlockHash> = self
            .orphans
            .iter()
            .filter(|(_, block)| self.tree.contains_key(block.prev_hash()))
            .map(|(hash, _)| hash.clone())
            .collect();

        ready
            .into_iter()
            .filter_map(|hash| self.orphans.remove(&hash))
            .collect()
    }

    /// Parent hashes still unknown, for fetch-by-hash requests to peers.
    pub fn missing_parents(&self) -> Vec<BlockHash> {
        let mut parents: Vec<BlockHash> = self
            .orphans
            .values()
            .map(|block| block.prev_hash().clone())
            .filter(|hash| !self.tree.contains_key(hash))
            .collect();
        parents.sort();
        parents.dedup();
        parents
    }

    // ------------------------------------------------------------------
    // Mining support
    // ------------------------------------------------------------------

    /// Atomic snapshot of the mining parent and queued ops.
    pub fn mining_snapshot(&self) -> (BlockHash, Vec<Op>) {
        let ops = self.mining_queue.values().cloned().collect();
        (self.tip.clone(), ops)
    }

    // ------------------------------------------------------------------
    // Queries for the client facade and peers
    // ------------------------------------------------------------------

    pub fn get_block(&self, hash: &str) -> Result<Block> {
        self.tree
            .get(hash)
            .map(|node| node.block.clone())
            .ok_or_else(|| ChainError::InvalidBlockHash(hash.to_string()))
    }

    pub fn get_children(&self, hash: &str) -> Result<Vec<BlockHash>> {
        self.tree
            .get(hash)
            .map(|node| node.children.clone())
            .ok_or_else(|| ChainError::InvalidBlockHash(hash.to_string()))
    }

    /// Op hashes carried by one block.
    pub fn get_shapes(&self, block_hash: &str) -> Result<Vec<OpHash>> {
        let node = self
            .tree
            .get(block_hash)
            .ok_or_else(|| ChainError::InvalidBlockHash(block_hash.to_string()))?;
        Ok(node.block.ops().iter().map(Op::hash_hex).collect())
    }

    /// Comma-separated kind, svg, fill and stroke for an op at the current
    /// tip. A shape that has been deleted renders white-on-white from the
    /// op log instead of failing.
    pub fn get_svg_fields(&self, op_hash: &str) -> Result<String> {
        let state = self.tip_state();
        let op = state
            .op_log
            .get(op_hash)
            .ok_or_else(|| ChainError::InvalidShapeHash(op_hash.to_string()))?;

        match state.canvas.get(op_hash) {
            Some(entry) => Ok(entry.shape.svg_fields()),
            None => Ok(op.shape.erased().svg_fields()),
        }
    }

    pub fn ink_of(&self, pubkey: &str) -> u32 {
        self.tip_state().ink_of(pubkey)
    }

    /// The live-canvas entry for an add-op hash at the current tip.
    pub fn canvas_entry(&self, op_hash: &str) -> Option<&CanvasEntry> {
        self.tip_state().canvas.get(op_hash)
    }

    /// The op recorded at the current tip for `op_hash`.
    pub fn logged_op(&self, op_hash: &str) -> Option<&Op> {
        self.tip_state().op_log.get(op_hash)
    }

    /// The chain from genesis (exclusive) to the current tip, in order.
    pub fn longest_chain(&self) -> Vec<Block> {
        let mut chain = Vec::new();
        let mut cursor = self.tip.clone();

        while cursor != self.settings.genesis_block_hash {
            let Some(node) = self.tree.get(&cursor) else {
                break;
            };
            cursor = node.block.prev_hash().clone();
            chain.push(node.block.clone());
        }

        chain.reverse();
        chain
    }
}
