use sha2::{Sha256, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }

        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }

    /// Number of zero bits before the first set bit, reading the digest
    /// as a big-endian binary string.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut count = 0u32;
        for byte in self.0.iter() {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros();
                break;
            }
        }
        count
    }

    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_zero_bits() >= difficulty
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

pub trait Hashable {
    fn hash(&self) -> Hash256;
}

impl Hashable for String {
    fn hash(&self) -> Hash256 {
        Hash256::hash(self.as_bytes())
    }
}

/// Lowercase hex SHA-256 of a UTF-8 string.
pub fn sha256_hex(data: &str) -> String {
    Hash256::hash(data.as_bytes()).to_hex()
}

/// Leading zero bits of a hex-encoded digest. Non-hex input counts as zero.
pub fn hex_leading_zero_bits(hex_hash: &str) -> u32 {
    let mut count = 0u32;
    for c in hex_hash.chars() {
        match c.to_digit(16) {
            Some(0) => count += 4,
            Some(nibble) => {
                count += (nibble as u8).leading_zeros() - 4;
                break;
            }
            None => break,
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256() {
        let data = b"hello world";
        let hash1 = Hash256::hash(data);
        let hash2 = Hash256::hash(data);

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, Hash256::zero());
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_leading_zero_bits() {
        let mut bytes = [0xffu8; 32];
        assert_eq!(Hash256::new(bytes).leading_zero_bits(), 0);

        bytes[0] = 0x00;
        bytes[1] = 0x1f;
        let hash = Hash256::new(bytes);
        assert_eq!(hash.leading_zero_bits(), 11);
        assert!(hash.meets_difficulty(11));
        assert!(!hash.meets_difficulty(12));

        assert_eq!(Hash256::zero().leading_zero_bits(), 256);
    }

    #[test]
    fn test_hex_leading_zero_bits_matches_bytes() {
        let hash = Hash256::hash(b"difficulty");
        assert_eq!(hex_leading_zero_bits(&hash.to_hex()), hash.leading_zero_bits());
        assert_eq!(hex_leading_zero_bits("001f"), 11);
        assert_eq!(hex_leading_zero_bits("8000"), 0);
        assert_eq!(hex_leading_zero_bits("zz"), 0);
    }
}
