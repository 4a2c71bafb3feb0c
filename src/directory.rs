//! Client for the bootstrap directory server.
//!
//! The directory's interface is reduced to four operations: register (which
//! returns the network parameters, including the genesis hash), heartbeat,
//! list peers, and implicitly the parameter publication carried by the
//! register reply. The server itself is an external collaborator; only the
//! wire types and the client side live here.

use crate::block::BlockHash;
use crate::crypto::PubKeyHex;
use crate::error::{ChainError, Result};
use crate::network::{read_frame, write_frame};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::debug;

/// Canvas dimensions shared by every miner on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSettings {
    pub canvas_x_max: u32,
    pub canvas_y_max: u32,
}

/// Parameters for an instance of the BlockArt network, published by the
/// directory server at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetSettings {
    /// Hash of the very first (empty) block in the chain.
    pub genesis_block_hash: BlockHash,

    /// The minimum number of miners a miner should stay connected to.
    /// Dipping below triggers another directory query.
    pub min_peer_connections: u8,

    /// Mining ink reward per op and no-op block.
    pub ink_per_op_block: u32,
    pub ink_per_no_op_block: u32,

    /// Milliseconds between heartbeat messages to the directory.
    pub heartbeat_ms: u32,

    /// Proof of work difficulty: number of zero nybbles in the hash prefix.
    pub pow_difficulty_op_block: u8,
    pub pow_difficulty_no_op_block: u8,

    pub canvas: CanvasSettings,
}

impl NetSettings {
    pub fn pow_difficulty(&self, op_block: bool) -> u8 {
        if op_block {
            self.pow_difficulty_op_block
        } else {
            self.pow_difficulty_no_op_block
        }
    }

    pub fn block_reward(&self, op_block: bool) -> u32 {
        if op_block {
            self.ink_per_op_block
        } else {
            self.ink_per_no_op_block
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DirectoryRequest {
    Register { address: String, pubkey: PubKeyHex },
    Heartbeat { pubkey: PubKeyHex },
    GetNodes { pubkey: PubKeyHex },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DirectoryResponse {
    Registered(NetSettings),
    HeartbeatAck,
    Nodes(Vec<String>),
    Error(String),
}

/// Directory-server client. Each call opens a fresh connection; the
/// directory is contacted rarely (registration, heartbeats, peer top-ups).
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    server_addr: String,
    listen_addr: String,
    pubkey: PubKeyHex,
}

impl DirectoryClient {
    pub fn new(server_addr: String, listen_addr: String, pubkey: PubKeyHex) -> Self {
        DirectoryClient {
            server_addr,
            listen_addr,
            pubkey,
        }
    }

    async fn call(&self, request: &DirectoryRequest) -> Result<DirectoryResponse> {
        let mut stream = TcpStream::connect(&self.server_addr)
            .await
            .map_err(|_| ChainError::Disconnected(self.server_addr.clone()))?;
        write_frame(&mut stream, request).await?;
        let response: DirectoryResponse = read_frame(&mut stream).await?;
        match response {
            DirectoryResponse::Error(msg) => Err(ChainError::NetworkError(msg)),
            other => Ok(other),
        }
    }

    /// Register this miner and receive the network parameters.
    pub async fn register(&self) -> Result<NetSettings> {
        debug!(addr = %self.listen_addr, "registering with directory server");
        let response = self
            .call(&DirectoryRequest::Register {
                address: self.listen_addr.clone(),
                pubkey: self.pubkey.clone(),
            })
            .await?;
        match response {
            DirectoryResponse::Registered(settings) => Ok(settings),
            other => Err(ChainError::NetworkError(format!(
                "unexpected register reply: {:?}",
                other
            ))),
        }
    }

    /// Send a liveness heartbeat; a failed heartbeat retries by
    /// re-registering before surfacing the disconnect.
    pub async fn heartbeat(&self) -> Result<()> {
        let request = DirectoryRequest::Heartbeat {
            pubkey: self.pubkey.clone(),
        };
        match self.call(&request).await {
            Ok(_) => Ok(()),
            Err(_) => {
                debug!("heartbeat failed, re-registering with directory");
                self.register().await.map(|_| ())
            }
        }
    }

    /// Fetch peer addresses to connect to.
    pub async fn get_nodes(&self) -> Result<Vec<String>> {
        let response = self
            .call(&DirectoryRequest::GetNodes {
                pubkey: self.pubkey.clone(),
            })
            .await?;
        match response {
            DirectoryResponse::Nodes(addrs) => Ok(addrs),
            other => Err(ChainError::NetworkError(format!(
                "unexpected get-nodes reply: {:?}",
                other
            ))),
        }
    }
}
