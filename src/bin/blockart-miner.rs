#![forbid(unsafe_code)]
//! BlockArt ink miner.
//!
//! Joins the miner network via the directory server, reconciles the chain,
//! and serves art clients over the HTTP facade.

use blockart::config::load_config;
use blockart::crypto::KeyPair;
use blockart::node::Node;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "blockart-miner", about = "BlockArt ink miner")]
struct Args {
    /// Directory server address (host:port)
    server_addr: String,
    /// Miner public key, hex encoded (must match the private key)
    pubkey_hex: String,
    /// Miner private key, hex encoded
    privkey_hex: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let keypair = match KeyPair::from_hex(&args.privkey_hex) {
        Ok(keypair) => keypair,
        Err(err) => {
            eprintln!("failed to parse key pair: {}", err);
            std::process::exit(1);
        }
    };
    if keypair.public_key_hex() != args.pubkey_hex.to_lowercase() {
        eprintln!("public key does not match the private key");
        std::process::exit(1);
    }

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config: {}", err);
            std::process::exit(1);
        }
    };

    let node = Node::new(config, keypair, args.server_addr);
    if let Err(err) = node.start().await {
        eprintln!("miner exited with error: {}", err);
        std::process::exit(1);
    }
}
