//! Error types for BlockArt

use std::fmt;

/// Errors raised by the miner core. The first group carries the stable
/// identities an art client matches on; the rest are ambient failures.
#[derive(Debug, Clone)]
pub enum ChainError {
    Disconnected(String),
    InsufficientInk(u32),
    InvalidSvg(String),
    SvgTooLong(String),
    InvalidShapeHash(String),
    ShapeOwner(String),
    OutOfBounds,
    ShapeOverlap(String),
    InvalidBlockHash(String),
    InvalidBlock(String),
    InvalidOp(String),
    CryptoError(String),
    NetworkError(String),
    EncodingError(String),
    IoError(String),
    ConfigError(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::Disconnected(addr) => write!(f, "cannot connect to [{}]", addr),
            ChainError::InsufficientInk(ink) => {
                write!(f, "not enough ink to add shape, remaining [{}]", ink)
            }
            ChainError::InvalidSvg(svg) => write!(f, "bad shape svg string [{}]", svg),
            ChainError::SvgTooLong(svg) => write!(f, "shape svg string too long [{}]", svg),
            ChainError::InvalidShapeHash(hash) => write!(f, "invalid shape hash [{}]", hash),
            ChainError::ShapeOwner(owner) => write!(f, "shape owned by someone else [{}]", owner),
            ChainError::OutOfBounds => write!(f, "shape is outside the bounds of the canvas"),
            ChainError::ShapeOverlap(svg) => {
                write!(f, "shape overlaps with a previously added shape [{}]", svg)
            }
            ChainError::InvalidBlockHash(hash) => write!(f, "invalid block hash [{}]", hash),
            ChainError::InvalidBlock(msg) => write!(f, "invalid block: {}", msg),
            ChainError::InvalidOp(msg) => write!(f, "invalid operation: {}", msg),
            ChainError::CryptoError(msg) => write!(f, "cryptographic error: {}", msg),
            ChainError::NetworkError(msg) => write!(f, "network error: {}", msg),
            ChainError::EncodingError(msg) => write!(f, "encoding error: {}", msg),
            ChainError::IoError(msg) => write!(f, "IO error: {}", msg),
            ChainError::ConfigError(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::EncodingError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
