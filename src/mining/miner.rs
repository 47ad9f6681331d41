use crate::core::{Block, Blockchain, Transaction};
use crate::crypto::hash::Hash256;
use crate::{HappeeError, Result};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Nonces tried between two polls of the cancellation signal.
const CANCEL_POLL_INTERVAL: u64 = 1024;

/// Times a search is restarted after the tip moved underneath it.
const DEFAULT_MAX_RESTARTS: usize = 8;

/// What goes into the next block.
#[derive(Debug, Clone)]
pub enum BlockData {
    /// A reward to `reward_address` followed by the whole pool.
    Pooled { reward_address: String },
    /// Exactly these transactions, coinbase included.
    Raw(Vec<Transaction>),
}

/// Deterministic nonce search from zero. Returns `None` once `cancelled`
/// reports true, which is polled every few thousand attempts.
pub fn find_block<F>(
    index: u64,
    timestamp: i64,
    data: Vec<Transaction>,
    previous_hash: String,
    difficulty: u32,
    cancelled: F,
) -> Option<Block>
where
    F: Fn() -> bool,
{
    let prefix = Block::hash_prefix(index, timestamp, &data, &previous_hash, difficulty);
    let mut base = Sha256::new();
    base.update(prefix.as_bytes());

    let mut nonce = 0u64;
    loop {
        if nonce % CANCEL_POLL_INTERVAL == 0 && cancelled() {
            return None;
        }

        let mut hasher = base.clone();
        hasher.update(nonce.to_string().as_bytes());
        let hash = Hash256::new(hasher.finalize().into());

        if hash.meets_difficulty(difficulty) {
            return Some(Block::new(index, timestamp, data, previous_hash, difficulty, nonce));
        }

        nonce = nonce.checked_add(1)?;
    }
}

/// Mines on top of the shared chain without holding its lock during the search.
#[derive(Clone)]
pub struct Miner {
    blockchain: Arc<RwLock<Blockchain>>,
    max_restarts: usize,
    blocks_mined: Arc<AtomicU64>,
}

struct Job {
    index: u64,
    timestamp: i64,
    data: Vec<Transaction>,
    previous_hash: String,
    difficulty: u32,
    generation: u64,
    tip_counter: Arc<AtomicU64>,
}

impl Miner {
    pub fn new(blockchain: Arc<RwLock<Blockchain>>) -> Self {
        Self {
            blockchain,
            max_restarts: DEFAULT_MAX_RESTARTS,
            blocks_mined: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_max_restarts(mut self, max_restarts: usize) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined.load(Ordering::Relaxed)
    }

    /// Mines and applies one block. The search restarts from the new tip
    /// whenever another block lands first.
    pub async fn mine(&self, data: BlockData) -> Result<Block> {
        for attempt in 0..=self.max_restarts {
            let job = self.prepare(&data).await;
            let index = job.index;
            log::info!(
                "⛏️  Mining block {} at difficulty {} (attempt {})",
                job.index,
                job.difficulty,
                attempt + 1
            );

            let found = tokio::task::spawn_blocking(move || {
                let Job { index, timestamp, data, previous_hash, difficulty, generation, tip_counter } = job;
                find_block(index, timestamp, data, previous_hash, difficulty, || {
                    tip_counter.load(Ordering::Acquire) != generation
                })
            })
            .await
            .map_err(|e| HappeeError::Mining(format!("Mining task failed: {}", e)))?;

            let Some(block) = found else {
                log::info!("🔄 Tip moved while mining block {}, restarting", index);
                continue;
            };

            let mut chain = self.blockchain.write().await;
            match chain.add_block(block.clone()) {
                Ok(()) => {
                    self.blocks_mined.fetch_add(1, Ordering::Relaxed);
                    log::info!("🎉 Mined block {} with hash {}", block.index, block.hash);
                    return Ok(block);
                }
                Err(HappeeError::Linkage(reason)) => {
                    log::info!("🔄 Mined block {} is stale ({}), restarting", index, reason);
                }
                Err(e) => return Err(e),
            }
        }

        Err(HappeeError::Mining(format!(
            "Gave up after {} restarts: the tip kept moving",
            self.max_restarts
        )))
    }

    async fn prepare(&self, data: &BlockData) -> Job {
        let chain = self.blockchain.read().await;
        let tip = chain.latest_block();
        let index = tip.index + 1;

        let data = match data {
            BlockData::Pooled { reward_address } => {
                let mut txs = vec![Transaction::coinbase(reward_address, index)];
                txs.extend(chain.pool().snapshot());
                txs
            }
            BlockData::Raw(txs) => txs.clone(),
        };

        Job {
            index,
            timestamp: chrono::Utc::now().timestamp(),
            data,
            previous_hash: tip.hash.clone(),
            difficulty: chain.current_difficulty(),
            generation: chain.generation(),
            tip_counter: chain.tip_counter(),
        }
    }
}
