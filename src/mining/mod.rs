//! Proof-of-work search and difficulty retargeting

pub mod miner;
pub mod difficulty;

pub use miner::{find_block, BlockData, Miner};
pub use difficulty::{accumulated_difficulty, DifficultyCalculator};
