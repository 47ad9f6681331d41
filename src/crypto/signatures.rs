use crate::{HappeeError, Result};
use secp256k1::ecdsa::Signature as Secp256k1Signature;

/// ECDSA signature carried on the wire as DER hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    inner: Secp256k1Signature,
}

impl Signature {
    pub fn from_secp256k1(signature: Secp256k1Signature) -> Self {
        Self { inner: signature }
    }

    /// High-S encodings are accepted and normalized before verification.
    pub fn to_secp256k1(&self) -> Secp256k1Signature {
        let mut normalized = self.inner;
        normalized.normalize_s();
        normalized
    }

    pub fn to_der(&self) -> Vec<u8> {
        self.inner.serialize_der().to_vec()
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = Secp256k1Signature::from_der(der)
            .map_err(|e| HappeeError::Signature(format!("Invalid DER signature: {}", e)))?;

        Ok(Self { inner })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_der())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let der = hex::decode(hex_str)
            .map_err(|e| HappeeError::Signature(format!("Invalid signature hex: {}", e)))?;
        Self::from_der(&der)
    }
}

/// Decodes a 64-character hex id into the digest that gets signed.
pub fn digest_from_hex(hex_id: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_id)
        .map_err(|e| HappeeError::Signature(format!("Invalid digest hex: {}", e)))?;

    if bytes.len() != 32 {
        return Err(HappeeError::Signature(format!(
            "Digest must be 32 bytes, got {}",
            bytes.len()
        )));
    }

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&bytes);
    Ok(digest)
}
