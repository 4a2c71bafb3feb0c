//! Proof-of-work mining.
//!
//! A single continuous loop: snapshot the mining queue, build an op or
//! no-op block on the current tip, and sample random nonces until the hash
//! prefix rule is met or the per-attempt deadline (difficulty x 25 s)
//! expires. Expiry restarts the loop, which is how queue and tip changes
//! get picked up; the search itself never suspends.

use crate::block::{zero_prefix, Block, NoOpBlock, OpBlock};
use crate::chain::{BlockIngest, ChainStore};
use crate::crypto::PubKeyHex;
use crate::error::Result;
use crate::network::NetworkNode;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Seconds of nonce search allowed per unit of difficulty.
pub const SECONDS_PER_DIFFICULTY: u64 = 25;

/// Sample nonces uniformly at random until the block's hash satisfies the
/// zero-prefix rule for `difficulty`. Returns `None` once the deadline
/// passes without a hit.
pub fn find_nonce(mut block: Block, difficulty: u8, deadline: Instant) -> Option<Block> {
    let mut rng = rand::thread_rng();

    loop {
        block.set_nonce(rng.gen());
        if zero_prefix(&block.hash(), difficulty) {
            return Some(block);
        }
        if Instant::now() >= deadline {
            return None;
        }
    }
}

/// The continuous mining task.
pub struct Miner {
    chain: Arc<RwLock<ChainStore>>,
    network: Arc<NetworkNode>,
    pubkey: PubKeyHex,
}

impl Miner {
    pub fn new(chain: Arc<RwLock<ChainStore>>, network: Arc<NetworkNode>, pubkey: PubKeyHex) -> Self {
        Miner {
            chain,
            network,
            pubkey,
        }
    }

    /// Mine forever. Each iteration is one bounded nonce-search attempt.
    pub async fn run(self: Arc<Self>) {
        loop {
            if let Err(err) = self.mine_once().await {
                // mined blocks are well-formed by construction
                error!(%err, "invariant violated: locally mined block rejected");
            }
        }
    }

    async fn mine_once(&self) -> Result<()> {
        let (block, difficulty) = {
            let chain = self.chain.read().await;
            let (parent, ops) = chain.mining_snapshot();
            let settings = chain.settings();

            let block = if ops.is_empty() {
                Block::NoOp(NoOpBlock {
                    prev_hash: parent,
                    miner_pubkey: self.pubkey.clone(),
                    nonce: 0,
                })
            } else {
                Block::Op(OpBlock {
                    prev_hash: parent,
                    ops,
                    miner_pubkey: self.pubkey.clone(),
                    nonce: 0,
                })
            };
            let difficulty = settings.pow_difficulty(block.is_op_block());
            (block, difficulty)
        };

        let deadline =
            Instant::now() + Duration::from_secs(u64::from(difficulty) * SECONDS_PER_DIFFICULTY);

        let mined = tokio::task::spawn_blocking(move || find_nonce(block, difficulty, deadline))
            .await
            .map_err(|e| crate::error::ChainError::IoError(e.to_string()))?;

        let Some(block) = mined else {
            // deadline expired; restart picks up queue and tip changes
            return Ok(());
        };

        debug!(hash = %block.hash(), ops = block.ops().len(), "mined block");

        let outcome = self.chain.write().await.ingest_block(block.clone())?;
        match outcome {
            BlockIngest::Inserted { .. } => {
                self.network.flood_block(&block).await;
            }
            other => {
                // the tip may have moved mid-search; nothing to publish
                warn!(?other, "mined block not inserted");
            }
        }

        Ok(())
    }
}
