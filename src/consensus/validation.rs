use crate::core::Block;
use crate::{HappeeError, Result};

/// Allowed clock skew, in seconds, on both timestamp bounds.
pub const TIMESTAMP_TOLERANCE: i64 = 60;

#[derive(Debug, Clone)]
pub struct BlockValidator {
    timestamp_tolerance: i64,
}

impl Default for BlockValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockValidator {
    pub fn new() -> Self {
        Self {
            timestamp_tolerance: TIMESTAMP_TOLERANCE,
        }
    }

    /// Header-level checks of `candidate` as the successor of `predecessor`.
    /// Transactions are checked separately when the block is applied.
    pub fn validate_block(&self, candidate: &Block, predecessor: &Block) -> Result<()> {
        self.validate_block_at(candidate, predecessor, chrono::Utc::now().timestamp())
    }

    pub fn validate_block_at(&self, candidate: &Block, predecessor: &Block, now: i64) -> Result<()> {
        let result = self.check_block(candidate, predecessor, now);
        if let Err(e) = &result {
            log::debug!("❌ Block {} rejected: {}", candidate.index, e);
        }
        result
    }

    fn check_block(&self, candidate: &Block, predecessor: &Block, now: i64) -> Result<()> {
        candidate.validate_structure()?;

        if predecessor.index.checked_add(1) != Some(candidate.index) {
            return Err(HappeeError::Linkage(format!(
                "Invalid index: expected {}, got {}",
                predecessor.index.saturating_add(1),
                candidate.index
            )));
        }

        if candidate.previous_hash != predecessor.hash {
            return Err(HappeeError::Linkage(format!(
                "Block {} does not extend {}",
                candidate.index, predecessor.hash
            )));
        }

        if !(predecessor.timestamp - self.timestamp_tolerance < candidate.timestamp
            && candidate.timestamp - self.timestamp_tolerance < now)
        {
            return Err(HappeeError::Timestamp(format!(
                "Block {} timestamp {} outside window (previous {}, now {})",
                candidate.index, candidate.timestamp, predecessor.timestamp, now
            )));
        }

        if !candidate.hash_matches_difficulty() {
            return Err(HappeeError::ProofOfWork(format!(
                "Block {} hash does not have {} leading zero bits",
                candidate.index, candidate.difficulty
            )));
        }

        if !candidate.has_valid_hash() {
            return Err(HappeeError::Structural(format!(
                "Block {} hash does not match its content",
                candidate.index
            )));
        }

        Ok(())
    }

    /// A chain must start with the fixed genesis block and link block by block.
    pub fn validate_chain(&self, blocks: &[Block]) -> Result<()> {
        self.validate_chain_at(blocks, chrono::Utc::now().timestamp())
    }

    pub fn validate_chain_at(&self, blocks: &[Block], now: i64) -> Result<()> {
        let first = blocks
            .first()
            .ok_or_else(|| HappeeError::Structural("Chain is empty".to_string()))?;

        if !first.is_genesis() {
            return Err(HappeeError::Linkage("Chain does not start at the genesis block".to_string()));
        }

        for pair in blocks.windows(2) {
            self.validate_block_at(&pair[1], &pair[0], now)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::mining::miner::find_block;

    fn next(prev: &Block, timestamp: i64, difficulty: u32) -> Block {
        let data = vec![Transaction::coinbase(crate::core::block::GENESIS_ADDRESS, prev.index + 1)];
        find_block(prev.index + 1, timestamp, data, prev.hash.clone(), difficulty, || false)
            .unwrap()
    }

    #[test]
    fn test_valid_successor() {
        let validator = BlockValidator::new();
        let genesis = Block::genesis();
        let block = next(&genesis, genesis.timestamp + 10, 4);
        assert!(validator.validate_block(&block, &genesis).is_ok());
    }

    #[test]
    fn test_linkage_failures() {
        let validator = BlockValidator::new();
        let genesis = Block::genesis();
        let block = next(&genesis, genesis.timestamp + 10, 0);

        let skip = Block::new(2, block.timestamp, vec![], genesis.hash.clone(), 0, 0);
        assert!(matches!(validator.validate_block(&skip, &genesis), Err(HappeeError::Linkage(_))));

        let orphan = Block::new(1, block.timestamp, vec![], "00".repeat(32), 0, 0);
        assert!(matches!(validator.validate_block(&orphan, &genesis), Err(HappeeError::Linkage(_))));
    }

    #[test]
    fn test_timestamp_window() {
        let validator = BlockValidator::new();
        let genesis = Block::genesis();
        let now = genesis.timestamp + 1_000;

        let too_old = next(&genesis, genesis.timestamp - 60, 0);
        assert!(matches!(
            validator.validate_block_at(&too_old, &genesis, now),
            Err(HappeeError::Timestamp(_))
        ));

        let slightly_old = next(&genesis, genesis.timestamp - 59, 0);
        assert!(validator.validate_block_at(&slightly_old, &genesis, now).is_ok());

        let future = next(&genesis, now + 60, 0);
        assert!(matches!(
            validator.validate_block_at(&future, &genesis, now),
            Err(HappeeError::Timestamp(_))
        ));
    }

    #[test]
    fn test_proof_of_work_and_hash() {
        let validator = BlockValidator::new();
        let genesis = Block::genesis();
        let mut block = next(&genesis, genesis.timestamp + 10, 6);

        // Claiming far more work than the hash carries.
        let mut inflated = block.clone();
        inflated.difficulty = 200;
        assert!(matches!(
            validator.validate_block(&inflated, &genesis),
            Err(HappeeError::ProofOfWork(_))
        ));

        block.nonce = block.nonce.wrapping_add(1);
        assert!(validator.validate_block(&block, &genesis).is_err());
    }

    #[test]
    fn test_chain_requires_genesis() {
        let validator = BlockValidator::new();
        let genesis = Block::genesis();
        let block = next(&genesis, genesis.timestamp + 10, 0);
        assert!(validator.validate_chain(&[genesis.clone(), block.clone()]).is_ok());

        let mut forged_genesis = genesis.clone();
        forged_genesis.timestamp += 1;
        forged_genesis.hash = forged_genesis.content_hash();
        assert!(matches!(
            validator.validate_chain(&[forged_genesis]),
            Err(HappeeError::Linkage(_))
        ));

        assert!(validator.validate_chain(&[]).is_err());
    }
}
