use crate::crypto::signatures::Signature;
use crate::{HappeeError, Result};
use rand::{rngs::OsRng, RngCore};
use secp256k1::{Message, PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use std::fmt;

/// Length of an address: an uncompressed public key in hex.
pub const ADDRESS_HEX_LEN: usize = 130;

#[derive(Clone)]
pub struct PrivateKey {
    key: SecretKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: Secp256k1PublicKey,
}

impl PrivateKey {
    pub fn new() -> Result<Self> {
        let mut rng = OsRng;
        loop {
            let mut secret_bytes = [0u8; 32];
            rng.fill_bytes(&mut secret_bytes);

            // Out-of-range scalars are astronomically rare; draw again.
            if let Ok(key) = SecretKey::from_slice(&secret_bytes) {
                return Ok(Self { key });
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(HappeeError::Crypto("Private key must be 32 bytes".to_string()));
        }

        let key = SecretKey::from_slice(bytes)
            .map_err(|e| HappeeError::Crypto(format!("Invalid private key: {}", e)))?;

        Ok(Self { key })
    }

    /// Parses a hex scalar. Short strings are left-padded with zeros.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let trimmed = hex_str.trim();
        if trimmed.is_empty() || trimmed.len() > 64 {
            return Err(HappeeError::Crypto("Private key hex must be 1 to 64 characters".to_string()));
        }

        let padded = format!("{:0>64}", trimmed);
        let bytes = hex::decode(&padded)
            .map_err(|e| HappeeError::Crypto(format!("Invalid private key hex: {}", e)))?;

        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.key.secret_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::signing_only();
        PublicKey {
            key: Secp256k1PublicKey::from_secret_key(&secp, &self.key),
        }
    }

    pub fn address(&self) -> String {
        self.public_key().to_address()
    }

    /// Signs a 32-byte digest.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<Signature> {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest_slice(digest)
            .map_err(|e| HappeeError::Crypto(format!("Invalid message: {}", e)))?;

        Ok(Signature::from_secp256k1(secp.sign_ecdsa(&message, &self.key)))
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key = Secp256k1PublicKey::from_slice(bytes)
            .map_err(|e| HappeeError::Crypto(format!("Invalid public key: {}", e)))?;

        Ok(Self { key })
    }

    pub fn from_address(address: &str) -> Result<Self> {
        if !is_valid_address(address) {
            return Err(HappeeError::Crypto(format!("Invalid address: {}", address)));
        }

        let bytes = hex::decode(address)
            .map_err(|e| HappeeError::Crypto(format!("Invalid address hex: {}", e)))?;

        Self::from_bytes(&bytes)
    }

    /// Uncompressed SEC1 encoding in lowercase hex.
    pub fn to_address(&self) -> String {
        hex::encode(self.key.serialize_uncompressed())
    }

    pub fn verify(&self, digest: &[u8; 32], signature: &Signature) -> Result<bool> {
        let secp = Secp256k1::verification_only();
        let message = Message::from_digest_slice(digest)
            .map_err(|e| HappeeError::Crypto(format!("Invalid message: {}", e)))?;

        Ok(secp.verify_ecdsa(&message, &signature.to_secp256k1(), &self.key).is_ok())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_address())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.address())
    }
}

/// Syntactic address check: 130 hex characters starting with "04".
/// Says nothing about whether the point is on the curve.
pub fn is_valid_address(address: &str) -> bool {
    address.len() == ADDRESS_HEX_LEN
        && address.starts_with("04")
        && address.chars().all(|c| c.is_ascii_hexdigit())
}
