//! Network-join chain reconciliation.
//!
//! A joining node seeds a genesis-only tree, asks every peer for its
//! longest chain, picks the majority chain, and applies it block by block
//! with full validation. There is no persistent storage: reconciliation is
//! the only source of initial state, and a node that finds no majority
//! simply mines from genesis.

use crate::block::{Block, BlockHash};
use crate::chain::{BlockIngest, ChainStore};
use crate::error::Result;
use crate::network::NetworkNode;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Pick the chain agreed on by a strict majority of peers.
///
/// Iterate from the greatest chain length downward; at each index,
/// partition the chains that reach it by the block hash they hold there.
/// The first index where some hash is held by strictly more than half of
/// the peers decides: the first such peer's chain is returned whole. No
/// majority at any index yields the empty chain.
pub fn majority_chain(chains: &[Vec<Block>]) -> Vec<Block> {
    let majority = chains.len() / 2;
    let max_len = chains.iter().map(Vec::len).max().unwrap_or(0);

    for i in (0..max_len).rev() {
        // hash -> (holders, first chain holding it)
        let mut tally: HashMap<BlockHash, (usize, usize)> = HashMap::new();
        for (chain_idx, chain) in chains.iter().enumerate() {
            if let Some(block) = chain.get(i) {
                let entry = tally.entry(block.hash()).or_insert((0, chain_idx));
                entry.0 += 1;
            }
        }

        for (count, chain_idx) in tally.values() {
            if *count > majority {
                return chains[*chain_idx].clone();
            }
        }
    }

    Vec::new()
}

/// Run the join handshake against the already-connected peer set, then
/// open the store for gossip and flush any blocks parked during init.
pub async fn bootstrap(chain: &Arc<RwLock<ChainStore>>, network: &Arc<NetworkNode>) -> Result<()> {
    let peer_chains = network.fetch_chains().await;
    let initial = majority_chain(&peer_chains);
    info!(
        peers = peer_chains.len(),
        blocks = initial.len(),
        "reconciled initial chain"
    );

    {
        let mut store = chain.write().await;
        for block in initial {
            let hash = block.hash();
            if store.contains_block(&hash) {
                continue;
            }
            // every reconciled block is validated on the way in
            store.ingest_block_now(block)?;
        }
    }

    let parked = chain.write().await.finish_init();
    for block in parked {
        let outcome = chain.write().await.ingest_block_now(block.clone());
        match outcome {
            Ok(BlockIngest::Inserted { .. }) => network.flood_block(&block).await,
            Ok(_) => {}
            Err(err) => warn!(%err, "parked block rejected during init flush"),
        }
    }

    info!("blockchain initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::NoOpBlock;
    use crate::crypto::KeyPair;

    fn linear_chain(miner: &KeyPair, genesis: &str, nonces: &[u32]) -> Vec<Block> {
        let mut chain = Vec::new();
        let mut prev = genesis.to_string();
        for &nonce in nonces {
            let block = Block::NoOp(NoOpBlock {
                prev_hash: prev,
                miner_pubkey: miner.public_key_hex(),
                nonce,
            });
            prev = block.hash();
            chain.push(block);
        }
        chain
    }

    #[test]
    fn test_majority_of_three_wins() {
        let miner = KeyPair::generate();
        let genesis = "83218ac34c1834c26781fe4bde918ee4";

        let agreed = linear_chain(&miner, genesis, &[1, 2, 3]);
        let lone = linear_chain(&miner, genesis, &[9, 8, 7]);

        let chains = vec![agreed.clone(), agreed.clone(), lone];
        let picked = majority_chain(&chains);
        assert_eq!(picked, agreed);
    }

    #[test]
    fn test_no_majority_yields_empty_chain() {
        let miner = KeyPair::generate();
        let genesis = "83218ac34c1834c26781fe4bde918ee4";

        let chains = vec![
            linear_chain(&miner, genesis, &[1, 2]),
            linear_chain(&miner, genesis, &[3, 4]),
        ];
        assert!(majority_chain(&chains).is_empty());
    }

    #[test]
    fn test_shared_prefix_counts_at_lower_index() {
        let miner = KeyPair::generate();
        let genesis = "83218ac34c1834c26781fe4bde918ee4";

        // all three peers share the first block, then diverge
        let base = linear_chain(&miner, genesis, &[1]);
        let mut a = base.clone();
        a.extend(linear_chain(&miner, &base[0].hash(), &[2]));
        let mut b = base.clone();
        b.extend(linear_chain(&miner, &base[0].hash(), &[3]));
        let c = base.clone();

        let picked = majority_chain(&[a.clone(), b, c]);
        // no majority at index 1; index 0 is unanimous and the first
        // holder's chain is returned whole
        assert_eq!(picked, a);
    }

    #[test]
    fn test_empty_input() {
        assert!(majority_chain(&[]).is_empty());
    }

    #[test]
    fn test_majority_prefers_deepest_agreement() {
        let miner = KeyPair::generate();
        let genesis = "83218ac34c1834c26781fe4bde918ee4";

        let long = linear_chain(&miner, genesis, &[1, 2, 3, 4]);
        let mut short = long.clone();
        short.truncate(2);

        // two peers carry the long chain, one lags behind
        let picked = majority_chain(&[short, long.clone(), long.clone()]);
        assert_eq!(picked, long);
    }
}
