use crate::core::Transaction;
use crate::crypto::hash::{hex_leading_zero_bits, Hash256, Hashable};
use crate::{HappeeError, Result};
use serde::{Deserialize, Serialize};

pub const GENESIS_TIMESTAMP: i64 = 1618302806;

/// Owner of the genesis reward. Its private key was discarded.
pub const GENESIS_ADDRESS: &str = "0459adb367940128264f6c0c1ca5e820f9dec8ce1b996e0f6d80b078fa74d3807e\
                                   1781c47da44af71b4a908603765c148de2a75cc23d672b84be1ddb8c4d8a3ef2";

pub const GENESIS_HASH: &str = "3eafd2ac3062928e46ca2abec714ad349d5e80a36d335d8df1cb048067b3bc1c";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: i64,
    pub data: Vec<Transaction>,
    pub previous_hash: String,
    pub difficulty: u32,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    pub fn new(
        index: u64,
        timestamp: i64,
        data: Vec<Transaction>,
        previous_hash: String,
        difficulty: u32,
        nonce: u64,
    ) -> Self {
        let hash = Self::calculate_hash(index, timestamp, &data, &previous_hash, difficulty, nonce);
        Self {
            index,
            timestamp,
            data,
            previous_hash,
            difficulty,
            nonce,
            hash,
        }
    }

    pub fn genesis() -> Self {
        Self::new(
            0,
            GENESIS_TIMESTAMP,
            vec![Transaction::coinbase(GENESIS_ADDRESS, 0)],
            String::new(),
            0,
            0,
        )
    }

    /// Everything the hash covers except the nonce, which is appended last.
    /// Numbers are decimal and `data` is compact JSON.
    pub fn hash_prefix(
        index: u64,
        timestamp: i64,
        data: &[Transaction],
        previous_hash: &str,
        difficulty: u32,
    ) -> String {
        // Structs of strings and integers always serialize.
        let data_json = serde_json::to_string(data).unwrap_or_default();
        format!("{}{}{}{}{}", index, timestamp, data_json, previous_hash, difficulty)
    }

    fn preimage(
        index: u64,
        timestamp: i64,
        data: &[Transaction],
        previous_hash: &str,
        difficulty: u32,
        nonce: u64,
    ) -> String {
        let mut preimage = Self::hash_prefix(index, timestamp, data, previous_hash, difficulty);
        preimage.push_str(&nonce.to_string());
        preimage
    }

    pub fn calculate_hash(
        index: u64,
        timestamp: i64,
        data: &[Transaction],
        previous_hash: &str,
        difficulty: u32,
        nonce: u64,
    ) -> String {
        Self::preimage(index, timestamp, data, previous_hash, difficulty, nonce)
            .hash()
            .to_hex()
    }

    pub fn content_hash(&self) -> String {
        self.hash().to_hex()
    }

    pub fn has_valid_hash(&self) -> bool {
        self.content_hash() == self.hash
    }

    pub fn hash_matches_difficulty(&self) -> bool {
        hex_leading_zero_bits(&self.hash) >= self.difficulty
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    /// Checks the parts of a block that serde typing leaves open.
    pub fn validate_structure(&self) -> Result<()> {
        if Hash256::from_hex(&self.hash).is_err() {
            return Err(HappeeError::Structural(format!(
                "Block {} hash is not a 32-byte hex digest",
                self.index
            )));
        }
        if self.index > 0 && Hash256::from_hex(&self.previous_hash).is_err() {
            return Err(HappeeError::Structural(format!(
                "Block {} previous hash is not a 32-byte hex digest",
                self.index
            )));
        }
        Ok(())
    }
}

impl Hashable for Block {
    fn hash(&self) -> Hash256 {
        Self::preimage(
            self.index,
            self.timestamp,
            &self.data,
            &self.previous_hash,
            self.difficulty,
            self.nonce,
        )
        .hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::COINBASE_AMOUNT;

    #[test]
    fn test_genesis_is_fixed() {
        let genesis = Block::genesis();
        assert_eq!(genesis.hash, GENESIS_HASH);
        assert!(genesis.has_valid_hash());
        assert!(genesis.is_genesis());
        assert_eq!(genesis.data.len(), 1);
        assert_eq!(genesis.data[0].tx_outs[0].amount, COINBASE_AMOUNT);
        assert!(genesis.validate_structure().is_ok());
    }

    #[test]
    fn test_hash_covers_every_field() {
        let genesis = Block::genesis();
        let base = Block::new(1, 100, vec![], genesis.hash.clone(), 0, 0);

        let variants = vec![
            Block::new(2, 100, vec![], genesis.hash.clone(), 0, 0),
            Block::new(1, 101, vec![], genesis.hash.clone(), 0, 0),
            Block::new(1, 100, genesis.data.clone(), genesis.hash.clone(), 0, 0),
            Block::new(1, 100, vec![], "00".repeat(32), 0, 0),
            Block::new(1, 100, vec![], genesis.hash.clone(), 1, 0),
            Block::new(1, 100, vec![], genesis.hash.clone(), 0, 1),
        ];
        for variant in variants {
            assert_ne!(variant.hash, base.hash);
        }
    }

    #[test]
    fn test_stale_hash_detected() {
        let mut block = Block::new(1, 100, vec![], GENESIS_HASH.to_string(), 0, 0);
        assert!(block.has_valid_hash());
        block.nonce += 1;
        assert!(!block.has_valid_hash());
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(Block::genesis()).unwrap();
        assert_eq!(json["previousHash"], "");
        assert_eq!(json["data"][0]["txIns"][0]["txOutIndex"], 0);
        assert_eq!(json["hash"], GENESIS_HASH);
    }

    #[test]
    fn test_structure_rejects_garbage_hash() {
        let mut block = Block::new(1, 100, vec![], GENESIS_HASH.to_string(), 0, 0);
        block.hash = "zz".to_string();
        assert!(matches!(block.validate_structure(), Err(HappeeError::Structural(_))));
    }
}
