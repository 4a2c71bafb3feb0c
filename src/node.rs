//! The long-lived miner process context.
//!
//! Owns the configuration, keys, chain store and network node, and wires
//! up the concurrent tasks: the gossip server, the mining loop, the
//! directory heartbeat, the peer-liveness probe and the orphan-resolution
//! scan. All chain mutations funnel through the single chain lock; the
//! peer table carries its own lock inside the network node.

use crate::api::{run_api_server, ApiNode};
use crate::chain::ChainStore;
use crate::config::Config;
use crate::crypto::KeyPair;
use crate::directory::DirectoryClient;
use crate::error::{ChainError, Result};
use crate::mining::Miner;
use crate::network::NetworkNode;
use crate::sync;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Interval between peer-liveness probes.
const PEER_CHECK_INTERVAL: Duration = Duration::from_secs(2);
/// Interval between orphan-resolution scans.
const ORPHAN_SCAN_INTERVAL: Duration = Duration::from_secs(5);

pub struct Node {
    pub config: Config,
    pub keypair: KeyPair,
    pub directory_addr: String,
}

impl Node {
    pub fn new(config: Config, keypair: KeyPair, directory_addr: String) -> Self {
        Node {
            config,
            keypair,
            directory_addr,
        }
    }

    /// Bring the miner up and run until the process exits.
    ///
    /// Startup order is deterministic: bind the gossip listener, register
    /// with the directory (which publishes the network parameters), seed
    /// the genesis-only tree, connect to peers, reconcile the initial
    /// chain, then start mining and the client facade.
    pub async fn start(self) -> Result<()> {
        let pubkey = self.keypair.public_key_hex();

        // 1) gossip listener first, so the advertised address is real
        let p2p_bind = format!("0.0.0.0:{}", self.config.network.p2p_port);
        let listener = TcpListener::bind(&p2p_bind).await.map_err(|e| {
            ChainError::NetworkError(format!("p2p port unavailable on {}: {}", p2p_bind, e))
        })?;
        let local_addr = listener.local_addr()?.to_string();
        let advertise_addr = self
            .config
            .network
            .advertise_addr
            .clone()
            .unwrap_or(local_addr);
        info!(addr = %advertise_addr, "miner listening for peers");

        // 2) register; the reply carries canvas dims, difficulties,
        //    rewards, heartbeat period and the genesis hash
        let directory = DirectoryClient::new(
            self.directory_addr.clone(),
            advertise_addr.clone(),
            pubkey.clone(),
        );
        let settings = directory.register().await?;
        info!(genesis = %settings.genesis_block_hash, "registered with directory");

        // 3) genesis-only tree with an empty snapshot
        let chain = Arc::new(RwLock::new(ChainStore::new(settings.clone())));
        let network = Arc::new(NetworkNode::new(
            chain.clone(),
            pubkey.clone(),
            advertise_addr,
        ));

        {
            let network = network.clone();
            tokio::spawn(async move {
                network.start_server(listener).await;
            });
        }

        // heartbeat loop against the directory
        {
            let directory = directory.clone();
            let period = Duration::from_millis(u64::from(settings.heartbeat_ms).max(100));
            tokio::spawn(async move {
                loop {
                    if let Err(err) = directory.heartbeat().await {
                        warn!(%err, "directory heartbeat failed");
                    }
                    tokio::time::sleep(period).await;
                }
            });
        }

        // 4) connect to peers and reconcile the initial chain
        connect_to_miners(&network, &directory, settings.min_peer_connections).await;
        sync::bootstrap(&chain, &network).await?;

        // peer-liveness probe; evictions below the minimum trigger a
        // directory top-up
        {
            let network = network.clone();
            let directory = directory.clone();
            let min_peers = settings.min_peer_connections;
            tokio::spawn(async move {
                loop {
                    network.check_liveness().await;
                    if network.peer_count().await < usize::from(min_peers) {
                        connect_to_miners(&network, &directory, min_peers).await;
                    }
                    tokio::time::sleep(PEER_CHECK_INTERVAL).await;
                }
            });
        }

        // orphan-resolution scan
        {
            let network = network.clone();
            tokio::spawn(async move {
                loop {
                    network.resolve_orphans().await;
                    tokio::time::sleep(ORPHAN_SCAN_INTERVAL).await;
                }
            });
        }

        // 5) mine
        if self.config.mining.enabled {
            let miner = Arc::new(Miner::new(chain.clone(), network.clone(), pubkey.clone()));
            tokio::spawn(async move {
                miner.run().await;
            });
        }

        info!("miner ready");

        // client facade runs on the foreground task
        let api_bind = format!("0.0.0.0:{}", self.config.network.api_port);
        let api_listener = TcpListener::bind(&api_bind).await.map_err(|e| {
            ChainError::NetworkError(format!("api port unavailable on {}: {}", api_bind, e))
        })?;
        info!(addr = %api_bind, "client facade listening");

        let api = ApiNode::new(chain, network, self.keypair);
        run_api_server(api, api_listener).await
    }
}

/// Fetch peer addresses from the directory and connect until the minimum
/// connection count is met.
async fn connect_to_miners(network: &Arc<NetworkNode>, directory: &DirectoryClient, min: u8) {
    let addrs = match directory.get_nodes().await {
        Ok(addrs) => addrs,
        Err(err) => {
            warn!(%err, "cannot fetch peers from directory");
            return;
        }
    };

    for addr in addrs {
        if network.peer_count().await >= usize::from(min) {
            break;
        }
        if addr == network.listen_addr() {
            continue;
        }
        match network.connect_peer(&addr).await {
            Ok(pubkey) => info!(peer = %pubkey, %addr, "connected to miner"),
            Err(err) => warn!(%addr, %err, "peer connection failed"),
        }
    }
}
