//! Operations, blocks and canonical hashing.
//!
//! Hashes are MD5 digests rendered as lowercase hex; a block is well-formed
//! when its rendered hash starts with the configured number of zero
//! nybbles. The pre-image layouts here are wire-canonical: serialization of
//! a block is exactly the bytes its hash is computed over.

use crate::crypto::{OpSig, PubKeyHex};
use crate::shape::Shape;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Lowercase-hex MD5 digest of a block's canonical bytes.
pub type BlockHash = String;
/// Lowercase-hex MD5 digest of an op's canonical bytes.
pub type OpHash = String;

fn md5_bytes(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

// ----------------------------------------------------------------------------
// Op
// ----------------------------------------------------------------------------

/// A signed add or delete of a shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Op {
    /// true for an add operation, false for a delete.
    pub add: bool,
    pub shape: Shape,
    /// Signature over the shape's content hash, by `pubkey`.
    pub sig: OpSig,
    pub pubkey: PubKeyHex,
    /// Confirmation depth before the op touches canvas and ink.
    pub validate_num: u8,
}

impl Op {
    /// Canonical pre-image: shape-hash ∥ R ∥ S ∥ pubkey ∥ validate-num.
    /// Delete ops overwrite byte 0 with 15 so an add and a delete of the
    /// same shape hash differently; historical quirk, reproduced bit-exactly.
    pub fn pre_image(&self) -> Vec<u8> {
        let shape_hash = self.shape.content_hash();
        let mut pre = Vec::with_capacity(16 + 32 + 32 + self.pubkey.len() + 1);
        pre.extend_from_slice(&shape_hash);
        pre.extend_from_slice(&self.sig.r);
        pre.extend_from_slice(&self.sig.s);
        pre.extend_from_slice(self.pubkey.as_bytes());
        pre.push(self.validate_num);
        if !self.add {
            pre[0] = 15;
        }
        pre
    }

    pub fn hash_bytes(&self) -> [u8; 16] {
        md5_bytes(&self.pre_image())
    }

    pub fn hash_hex(&self) -> OpHash {
        hex::encode(self.hash_bytes())
    }

    /// The same op with the add flag replaced; a delete is the stored add op
    /// with the flag flipped, signature fields untouched.
    pub fn with_add(&self, add: bool) -> Op {
        Op {
            add,
            ..self.clone()
        }
    }
}

// ----------------------------------------------------------------------------
// Blocks
// ----------------------------------------------------------------------------

/// A proof-of-work block carrying at least one op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpBlock {
    pub prev_hash: BlockHash,
    pub ops: Vec<Op>,
    pub miner_pubkey: PubKeyHex,
    pub nonce: u32,
}

/// A proof-of-work block carrying no ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoOpBlock {
    pub prev_hash: BlockHash,
    pub miner_pubkey: PubKeyHex,
    pub nonce: u32,
}

/// The two block kinds are fixed, so Block is a closed variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Op(OpBlock),
    NoOp(NoOpBlock),
}

impl Block {
    pub fn prev_hash(&self) -> &BlockHash {
        match self {
            Block::Op(b) => &b.prev_hash,
            Block::NoOp(b) => &b.prev_hash,
        }
    }

    pub fn miner_pubkey(&self) -> &PubKeyHex {
        match self {
            Block::Op(b) => &b.miner_pubkey,
            Block::NoOp(b) => &b.miner_pubkey,
        }
    }

    pub fn nonce(&self) -> u32 {
        match self {
            Block::Op(b) => b.nonce,
            Block::NoOp(b) => b.nonce,
        }
    }

    pub fn set_nonce(&mut self, nonce: u32) {
        match self {
            Block::Op(b) => b.nonce = nonce,
            Block::NoOp(b) => b.nonce = nonce,
        }
    }

    /// The block's ops; empty for a no-op block.
    pub fn ops(&self) -> &[Op] {
        match self {
            Block::Op(b) => &b.ops,
            Block::NoOp(_) => &[],
        }
    }

    pub fn is_op_block(&self) -> bool {
        matches!(self, Block::Op(_))
    }

    /// Canonical pre-image the block hash is computed over.
    ///
    /// OpBlock: parent-hash ∥ op-hashes ∥ miner-pk ∥ big-endian nonce.
    /// NoOpBlock: parent-hash ∥ miner-pk ∥ big-endian nonce.
    pub fn pre_image(&self) -> Vec<u8> {
        let mut pre = Vec::new();
        pre.extend_from_slice(self.prev_hash().as_bytes());
        for op in self.ops() {
            pre.extend_from_slice(&op.hash_bytes());
        }
        pre.extend_from_slice(self.miner_pubkey().as_bytes());
        pre.extend_from_slice(&self.nonce().to_be_bytes());
        pre
    }

    pub fn hash(&self) -> BlockHash {
        hex::encode(md5_bytes(&self.pre_image()))
    }
}

/// Generic wire form holding either block kind; an empty ops array marks a
/// no-op block. Used for chain transfers between miners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralBlock {
    pub prev_hash: BlockHash,
    pub miner_pubkey: PubKeyHex,
    pub nonce: u32,
    pub ops: Vec<Op>,
}

impl From<Block> for GeneralBlock {
    fn from(block: Block) -> Self {
        match block {
            Block::Op(b) => GeneralBlock {
                prev_hash: b.prev_hash,
                miner_pubkey: b.miner_pubkey,
                nonce: b.nonce,
                ops: b.ops,
            },
            Block::NoOp(b) => GeneralBlock {
                prev_hash: b.prev_hash,
                miner_pubkey: b.miner_pubkey,
                nonce: b.nonce,
                ops: Vec::new(),
            },
        }
    }
}

impl From<GeneralBlock> for Block {
    fn from(general: GeneralBlock) -> Self {
        if general.ops.is_empty() {
            Block::NoOp(NoOpBlock {
                prev_hash: general.prev_hash,
                miner_pubkey: general.miner_pubkey,
                nonce: general.nonce,
            })
        } else {
            Block::Op(OpBlock {
                prev_hash: general.prev_hash,
                ops: general.ops,
                miner_pubkey: general.miner_pubkey,
                nonce: general.nonce,
            })
        }
    }
}

// ----------------------------------------------------------------------------
// Proof of work
// ----------------------------------------------------------------------------

/// Whether a rendered hash starts with `difficulty` zero nybbles, decided
/// by parsing the prefix as a hex integer.
pub fn zero_prefix(hash: &BlockHash, difficulty: u8) -> bool {
    let len = (difficulty as usize).min(hash.len());
    if len == 0 {
        return true;
    }
    match u128::from_str_radix(&hash[..len], 16) {
        Ok(prefix) => prefix == 0,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::shape::Shape;
    use crate::svg::ShapeKind;

    fn signed_op(keypair: &KeyPair, svg: &str, add: bool, validate_num: u8) -> Op {
        let shape = Shape {
            owner: keypair.public_key_hex(),
            kind: ShapeKind::Path,
            svg: svg.to_string(),
            fill: "transparent".to_string(),
            stroke: "red".to_string(),
        };
        let sig = keypair.sign(&shape.content_hash()).unwrap();
        Op {
            add,
            shape,
            sig,
            pubkey: keypair.public_key_hex(),
            validate_num,
        }
    }

    #[test]
    fn test_add_and_delete_hash_differently() {
        let keypair = KeyPair::generate();
        let add = signed_op(&keypair, "M 0 0 H 20 V 20 h -20 Z", true, 4);
        let delete = add.with_add(false);

        assert_eq!(add.shape.content_hash(), delete.shape.content_hash());
        assert_ne!(add.hash_hex(), delete.hash_hex());
    }

    #[test]
    fn test_op_hash_is_md5_of_pre_image() {
        let keypair = KeyPair::generate();
        let op = signed_op(&keypair, "M 1 1 L 2 2", true, 2);
        assert_eq!(op.hash_bytes(), md5_bytes(&op.pre_image()));
        assert_eq!(op.hash_hex().len(), 32);
    }

    #[test]
    fn test_block_hash_covers_serialization() {
        let keypair = KeyPair::generate();
        let op = signed_op(&keypair, "M 1 1 L 2 2", true, 2);

        let block = Block::Op(OpBlock {
            prev_hash: "83218ac34c1834c26781fe4bde918ee4".to_string(),
            ops: vec![op],
            miner_pubkey: keypair.public_key_hex(),
            nonce: 7,
        });

        assert_eq!(block.hash(), hex::encode(md5_bytes(&block.pre_image())));
    }

    #[test]
    fn test_nonce_changes_block_hash() {
        let keypair = KeyPair::generate();
        let mut block = Block::NoOp(NoOpBlock {
            prev_hash: "83218ac34c1834c26781fe4bde918ee4".to_string(),
            miner_pubkey: keypair.public_key_hex(),
            nonce: 0,
        });

        let before = block.hash();
        block.set_nonce(1);
        assert_ne!(before, block.hash());
    }

    #[test]
    fn test_general_block_roundtrip() {
        let keypair = KeyPair::generate();
        let op = signed_op(&keypair, "M 1 1 L 2 2", true, 2);

        let op_block = Block::Op(OpBlock {
            prev_hash: "aa".to_string(),
            ops: vec![op],
            miner_pubkey: keypair.public_key_hex(),
            nonce: 3,
        });
        let no_op_block = Block::NoOp(NoOpBlock {
            prev_hash: "bb".to_string(),
            miner_pubkey: keypair.public_key_hex(),
            nonce: 4,
        });

        let restored: Block = GeneralBlock::from(op_block.clone()).into();
        assert_eq!(restored, op_block);

        let restored: Block = GeneralBlock::from(no_op_block.clone()).into();
        assert_eq!(restored, no_op_block);
        assert!(restored.ops().is_empty());
    }

    #[test]
    fn test_zero_prefix() {
        let hash = "00a1b2c3d4e5f60718293a4b5c6d7e8f".to_string();
        assert!(zero_prefix(&hash, 0));
        assert!(zero_prefix(&hash, 1));
        assert!(zero_prefix(&hash, 2));
        assert!(!zero_prefix(&hash, 3));

        let all_zero = "0".repeat(32);
        assert!(zero_prefix(&all_zero, 32));
    }
}
