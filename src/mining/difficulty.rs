use crate::core::Block;

/// Target seconds between blocks.
pub const BLOCK_GENERATION_INTERVAL: i64 = 10;

/// Blocks between difficulty adjustments.
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 10;

#[derive(Debug, Clone)]
pub struct DifficultyCalculator {
    pub generation_interval: i64,  // seconds
    pub adjustment_interval: u64,  // blocks
}

impl Default for DifficultyCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl DifficultyCalculator {
    pub fn new() -> Self {
        Self {
            generation_interval: BLOCK_GENERATION_INTERVAL,
            adjustment_interval: DIFFICULTY_ADJUSTMENT_INTERVAL,
        }
    }

    /// Difficulty the next block should be mined at.
    pub fn current_difficulty(&self, blocks: &[Block]) -> u32 {
        let Some(tip) = blocks.last() else {
            return 0;
        };

        if tip.index > 0 && tip.index % self.adjustment_interval == 0 {
            self.retarget(blocks)
        } else {
            tip.difficulty
        }
    }

    /// Compares the time the last window took against the target and moves
    /// the window's starting difficulty by at most one step.
    pub fn retarget(&self, blocks: &[Block]) -> u32 {
        let Some(tip) = blocks.last() else {
            return 0;
        };

        let Some(anchor) = tip
            .index
            .checked_sub(self.adjustment_interval)
            .and_then(|index| blocks.get(index as usize))
        else {
            return tip.difficulty;
        };

        let expected = self.generation_interval * self.adjustment_interval as i64;
        let actual = tip.timestamp - anchor.timestamp;

        let difficulty = if actual < expected / 2 {
            anchor.difficulty.saturating_add(1)
        } else if actual > expected * 2 {
            anchor.difficulty.saturating_sub(1)
        } else {
            anchor.difficulty
        };

        log::debug!(
            "🎯 Retarget at block {}: window took {}s (expected {}s), difficulty {} -> {}",
            tip.index,
            actual,
            expected,
            anchor.difficulty,
            difficulty
        );
        difficulty
    }
}

/// Work weight of a chain: the sum of 2^difficulty over its blocks.
pub fn accumulated_difficulty(blocks: &[Block]) -> u128 {
    blocks.iter().fold(0u128, |acc, block| {
        let work = 1u128.checked_shl(block.difficulty).unwrap_or(u128::MAX);
        acc.saturating_add(work)
    })
}
