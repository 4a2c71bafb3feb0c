//! Cryptographic primitives for BlockArt
//!
//! Keys travel the network as hex-encoded compressed secp256k1 points; ops
//! carry compact ECDSA signatures split into their R and S halves so the
//! canonical op pre-image can concatenate them in a fixed order.

use crate::error::{ChainError, Result};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
/// This prevents repeated, unnecessary context creation.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Hex rendering of a compressed public key; the identity miners and shape
/// owners are known by throughout the chain.
pub type PubKeyHex = String;

/// The fixed constant an art client signs to prove key custody when
/// opening a canvas.
pub const CANVAS_REG_MESSAGE: &[u8] = b"message to be signed by artnode for key verification";

/// An ECDSA signature in canonical (R, S) halves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpSig {
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl OpSig {
    pub fn from_compact(bytes: [u8; COMPACT_SIGNATURE_SIZE]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        OpSig { r, s }
    }

    pub fn to_compact(&self) -> [u8; COMPACT_SIGNATURE_SIZE] {
        let mut bytes = [0u8; COMPACT_SIGNATURE_SIZE];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from a hex-encoded secret key.
    pub fn from_hex(privkey_hex: &str) -> Result<Self> {
        let bytes = hex::decode(privkey_hex)
            .map_err(|e| ChainError::CryptoError(format!("invalid hex secret key: {}", e)))?;
        let secret_key = SecretKey::from_slice(&bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::CryptoError(format!("invalid secret key bytes: {}", e))
            }
        })?;
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        Ok(KeyPair {
            secret_key,
            public_key,
        })
    }

    /// Hex rendering of the compressed public key.
    pub fn public_key_hex(&self) -> PubKeyHex {
        hex::encode(self.public_key.serialize())
    }

    /// Signs a message (which is first hashed using SHA-256) and returns the
    /// signature in (R, S) halves.
    pub fn sign(&self, message: &[u8]) -> Result<OpSig> {
        let digest = Sha256::digest(message);
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| ChainError::CryptoError(format!("failed to create message: {}", e)))?;
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(OpSig::from_compact(signature.serialize_compact()))
    }
}

/// Parse a hex-encoded compressed public key.
pub fn decode_pubkey(pubkey_hex: &str) -> Result<PublicKey> {
    let bytes = hex::decode(pubkey_hex)
        .map_err(|e| ChainError::CryptoError(format!("invalid hex public key: {}", e)))?;
    if bytes.len() != PUBLIC_KEY_SIZE {
        return Err(ChainError::CryptoError(format!(
            "public key must be exactly {} bytes (compressed), got {}",
            PUBLIC_KEY_SIZE,
            bytes.len()
        )));
    }
    PublicKey::from_slice(&bytes)
        .map_err(|e| ChainError::CryptoError(format!("invalid public key: {}", e)))
}

/// Verifies an ECDSA signature given the hex public key, message, and
/// (R, S) signature halves.
pub fn verify_signature(pubkey_hex: &str, message: &[u8], sig: &OpSig) -> Result<()> {
    let public_key = decode_pubkey(pubkey_hex)?;

    let digest = Sha256::digest(message);
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| ChainError::CryptoError(format!("failed to create message: {}", e)))?;

    let signature = Signature::from_compact(&sig.to_compact())
        .map_err(|e| ChainError::CryptoError(format!("invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| ChainError::CryptoError("signature verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation_roundtrip() {
        let keypair = KeyPair::generate();
        let hex_pk = keypair.public_key_hex();
        assert_eq!(hex_pk.len(), PUBLIC_KEY_SIZE * 2);

        let restored = KeyPair::from_hex(&hex::encode(keypair.secret_key.secret_bytes())).unwrap();
        assert_eq!(restored.public_key_hex(), hex_pk);
    }

    #[test]
    fn test_signing_and_verification() {
        let keypair = KeyPair::generate();
        let message = b"Hello, BlockArt!";

        let sig = keypair.sign(message).unwrap();
        assert!(verify_signature(&keypair.public_key_hex(), message, &sig).is_ok());
    }

    #[test]
    fn test_wrong_key_fails() {
        let keypair1 = KeyPair::generate();
        let keypair2 = KeyPair::generate();

        let message = b"Test message";
        let sig = keypair1.sign(message).unwrap();

        let result = verify_signature(&keypair2.public_key_hex(), message, &sig);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().to_string(),
            "cryptographic error: signature verification failed"
        );
    }

    #[test]
    fn test_tampered_message_fails() {
        let keypair = KeyPair::generate();
        let sig = keypair.sign(b"Original message").unwrap();

        let result = verify_signature(&keypair.public_key_hex(), b"Tampered message", &sig);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_pubkey_length() {
        let keypair = KeyPair::generate();
        let sig = keypair.sign(b"Test").unwrap();

        let short_key = &keypair.public_key_hex()[2..];
        let result = verify_signature(short_key, b"Test", &sig);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("public key must be exactly"));
    }

    #[test]
    fn test_sig_compact_roundtrip() {
        let keypair = KeyPair::generate();
        let sig = keypair.sign(b"roundtrip").unwrap();
        let restored = OpSig::from_compact(sig.to_compact());
        assert_eq!(sig, restored);
    }
}
