//! Miner-to-miner gossip.
//!
//! Peers are keyed by public key in a table behind its own lock; each entry
//! owns an open TCP channel that serializes one request/reply exchange at a
//! time. Ops and blocks flood the table, with "already known" checks in the
//! chain store suppressing flood-back cycles: an inbound item is forwarded
//! at most once per local process.

use crate::block::{Block, BlockHash, GeneralBlock, NoOpBlock, Op, OpBlock};
use crate::chain::{BlockIngest, ChainStore, OpIngest};
use crate::crypto::PubKeyHex;
use crate::error::{ChainError, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Upper bound on a single wire frame.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// How long a connect handler waits on the dial-back before giving up.
const DIAL_BACK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Framing
// ----------------------------------------------------------------------------

/// Write one length-prefixed bincode frame.
pub async fn write_frame<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<()> {
    let payload = bincode::serialize(value)?;
    let len = payload.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed bincode frame.
pub async fn read_frame<T: DeserializeOwned>(stream: &mut TcpStream) -> Result<T> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ChainError::EncodingError(format!(
            "frame of {} bytes exceeds limit",
            len
        )));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(bincode::deserialize(&payload)?)
}

// ----------------------------------------------------------------------------
// Wire protocol
// ----------------------------------------------------------------------------

/// The six miner-to-miner RPCs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerMessage {
    Connect { addr: String, pubkey: PubKeyHex },
    GetBlock { hash: BlockHash },
    IsAlive,
    FloodOp(Op),
    FloodOpBlock(OpBlock),
    FloodNoOpBlock(NoOpBlock),
    GetChain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerReply {
    Connected { pubkey: PubKeyHex },
    Block(Option<GeneralBlock>),
    Alive,
    Ack,
    Chain(Vec<GeneralBlock>),
    Error(String),
}

/// An open channel to one peer. Calls serialize through the stream mutex so
/// request/reply pairs never interleave.
pub struct PeerConnection {
    pub addr: String,
    stream: Mutex<TcpStream>,
}

impl PeerConnection {
    async fn call(&self, message: &PeerMessage) -> Result<PeerReply> {
        let mut stream = self.stream.lock().await;
        write_frame(&mut stream, message).await?;
        read_frame(&mut stream).await
    }
}

// ----------------------------------------------------------------------------
// Network node
// ----------------------------------------------------------------------------

pub struct NetworkNode {
    chain: Arc<RwLock<ChainStore>>,
    peers: RwLock<HashMap<PubKeyHex, Arc<PeerConnection>>>,
    pubkey: PubKeyHex,
    listen_addr: String,
}

impl NetworkNode {
    pub fn new(chain: Arc<RwLock<ChainStore>>, pubkey: PubKeyHex, listen_addr: String) -> Self {
        NetworkNode {
            chain,
            peers: RwLock::new(HashMap::new()),
            pubkey,
            listen_addr,
        }
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    async fn peer_snapshot(&self) -> Vec<(PubKeyHex, Arc<PeerConnection>)> {
        self.peers
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Register a channel for a peer. A duplicate keeps the older channel.
    async fn add_peer(&self, pubkey: PubKeyHex, connection: PeerConnection) {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&pubkey) {
            return;
        }
        debug!(peer = %pubkey, total = peers.len() + 1, "new neighbour");
        peers.insert(pubkey, Arc::new(connection));
    }

    pub async fn remove_peer(&self, pubkey: &str) {
        let mut peers = self.peers.write().await;
        if peers.remove(pubkey).is_some() {
            debug!(peer = %pubkey, total = peers.len(), "inactive miner removed");
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Dial a peer and perform the connect handshake; the callee answers
    /// with its public key, which keys our table entry.
    pub async fn connect_peer(&self, addr: &str) -> Result<PubKeyHex> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|_| ChainError::Disconnected(addr.to_string()))?;

        write_frame(
            &mut stream,
            &PeerMessage::Connect {
                addr: self.listen_addr.clone(),
                pubkey: self.pubkey.clone(),
            },
        )
        .await?;
        let reply: PeerReply = read_frame(&mut stream).await?;

        match reply {
            PeerReply::Connected { pubkey } => {
                self.add_peer(
                    pubkey.clone(),
                    PeerConnection {
                        addr: addr.to_string(),
                        stream: Mutex::new(stream),
                    },
                )
                .await;
                Ok(pubkey)
            }
            other => Err(ChainError::NetworkError(format!(
                "unexpected connect reply: {:?}",
                other
            ))),
        }
    }

    /// Flood an op to every peer. Per-peer failures are logged and do not
    /// roll back local state.
    pub async fn flood_op(&self, op: &Op) {
        let message = PeerMessage::FloodOp(op.clone());
        for (pubkey, peer) in self.peer_snapshot().await {
            if let Err(err) = peer.call(&message).await {
                warn!(peer = %pubkey, %err, "flood op failed");
            }
        }
    }

    /// Flood a block to every peer, using the RPC matching its kind.
    pub async fn flood_block(&self, block: &Block) {
        let message = match block {
            Block::Op(b) => PeerMessage::FloodOpBlock(b.clone()),
            Block::NoOp(b) => PeerMessage::FloodNoOpBlock(b.clone()),
        };
        for (pubkey, peer) in self.peer_snapshot().await {
            if let Err(err) = peer.call(&message).await {
                warn!(peer = %pubkey, %err, "flood block failed");
            }
        }
    }

    /// Ask peers for a block by hash; first answer wins.
    pub async fn fetch_block(&self, hash: &BlockHash) -> Option<Block> {
        let message = PeerMessage::GetBlock { hash: hash.clone() };
        for (pubkey, peer) in self.peer_snapshot().await {
            match peer.call(&message).await {
                Ok(PeerReply::Block(Some(general))) => return Some(general.into()),
                Ok(_) => {}
                Err(err) => warn!(peer = %pubkey, %err, "get block failed"),
            }
        }
        None
    }

    /// Fetch every peer's longest chain for join reconciliation.
    pub async fn fetch_chains(&self) -> Vec<Vec<Block>> {
        let mut chains = Vec::new();
        for (pubkey, peer) in self.peer_snapshot().await {
            match peer.call(&PeerMessage::GetChain).await {
                Ok(PeerReply::Chain(general)) => {
                    debug!(peer = %pubkey, len = general.len(), "received peer chain");
                    chains.push(general.into_iter().map(Block::from).collect());
                }
                Ok(other) => warn!(peer = %pubkey, ?other, "unexpected get-chain reply"),
                Err(err) => warn!(peer = %pubkey, %err, "get chain failed"),
            }
        }
        chains
    }

    /// Probe every peer and evict the ones that no longer answer.
    pub async fn check_liveness(&self) {
        for (pubkey, peer) in self.peer_snapshot().await {
            match peer.call(&PeerMessage::IsAlive).await {
                Ok(PeerReply::Alive) => {}
                _ => self.remove_peer(&pubkey).await,
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Accept loop for the miner's listen socket.
    pub async fn start_server(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    debug!(%remote, "inbound miner connection");
                    let node = self.clone();
                    tokio::spawn(async move {
                        node.serve_connection(stream).await;
                    });
                }
                Err(err) => {
                    warn!(%err, "accept failed");
                }
            }
        }
    }

    async fn serve_connection(&self, mut stream: TcpStream) {
        loop {
            let message: PeerMessage = match read_frame(&mut stream).await {
                Ok(message) => message,
                // EOF or a broken peer ends the session
                Err(_) => return,
            };

            let reply = self.handle_message(message).await;
            if write_frame(&mut stream, &reply).await.is_err() {
                return;
            }
        }
    }

    async fn handle_message(&self, message: PeerMessage) -> PeerReply {
        match message {
            PeerMessage::Connect { addr, pubkey } => {
                // dial back so we hold our own channel to the caller
                match tokio::time::timeout(DIAL_BACK_TIMEOUT, TcpStream::connect(&addr)).await {
                    Ok(Ok(stream)) => {
                        self.add_peer(
                            pubkey,
                            PeerConnection {
                                addr,
                                stream: Mutex::new(stream),
                            },
                        )
                        .await;
                    }
                    _ => warn!(%addr, "dial-back failed"),
                }
                PeerReply::Connected {
                    pubkey: self.pubkey.clone(),
                }
            }
            PeerMessage::IsAlive => PeerReply::Alive,
            PeerMessage::GetBlock { hash } => {
                let block = self.chain.read().await.get_block(&hash).ok();
                PeerReply::Block(block.map(GeneralBlock::from))
            }
            PeerMessage::GetChain => {
                let chain = self.chain.read().await.longest_chain();
                PeerReply::Chain(chain.into_iter().map(GeneralBlock::from).collect())
            }
            PeerMessage::FloodOp(op) => {
                self.ingest_op(op).await;
                PeerReply::Ack
            }
            PeerMessage::FloodOpBlock(block) => {
                self.ingest_block(Block::Op(block)).await;
                PeerReply::Ack
            }
            PeerMessage::FloodNoOpBlock(block) => {
                self.ingest_block(Block::NoOp(block)).await;
                PeerReply::Ack
            }
        }
    }

    /// Queue an inbound op and forward it once if it was new.
    pub async fn ingest_op(&self, op: Op) {
        let outcome = self.chain.write().await.submit_op(op.clone());
        match outcome {
            Ok(OpIngest::Queued(hash)) => {
                debug!(op = %hash, "op queued, re-flooding");
                self.flood_op(&op).await;
            }
            Ok(OpIngest::AlreadyKnown) => {}
            Err(err) => warn!(%err, "rejected inbound op"),
        }
    }

    /// Link an inbound block and forward it once if it was new.
    pub async fn ingest_block(&self, block: Block) {
        let outcome = self.chain.write().await.ingest_block(block.clone());
        match outcome {
            Ok(BlockIngest::Inserted { hash, .. }) => {
                debug!(block = %hash, "block linked, re-flooding");
                self.flood_block(&block).await;
            }
            Ok(BlockIngest::MissingParent) => {
                // the orphan task fetches missing parents on its next scan
            }
            Ok(BlockIngest::AlreadyKnown) | Ok(BlockIngest::HeldForInit) => {}
            Err(err) => warn!(%err, "rejected inbound block"),
        }
    }

    /// Resolve waiting orphans: re-offer the ones whose parent arrived and
    /// fetch still-missing parents from peers.
    pub async fn resolve_orphans(&self) {
        let ready = self.chain.write().await.ready_orphans();
        for block in ready {
            self.ingest_block(block).await;
        }

        let missing = self.chain.read().await.missing_parents();
        for hash in missing {
            if let Some(parent) = self.fetch_block(&hash).await {
                self.ingest_block(parent).await;
            }
        }
    }
}
