use crate::consensus::validation::BlockValidator;
use crate::core::pool::TransactionPool;
use crate::core::transaction::apply_transactions;
use crate::core::utxo::UtxoSet;
use crate::core::{Block, Transaction};
use crate::mining::difficulty::{accumulated_difficulty, DifficultyCalculator};
use crate::storage::Database;
use crate::{HappeeError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Ledger state of one node: the chain, the UTXO set derived from it and
/// the pending pool. Callers serialize mutations; readers get `Arc` snapshots.
#[derive(Debug)]
pub struct Blockchain {
    blocks: Arc<Vec<Block>>,
    utxos: Arc<UtxoSet>,
    pool: TransactionPool,
    db: Option<Database>,
    validator: BlockValidator,
    difficulty_calc: DifficultyCalculator,
    tip_counter: Arc<AtomicU64>,
}

impl Blockchain {
    /// Loads the persisted chain, or starts from genesis and persists that.
    /// A stored chain that fails validation is a fatal error.
    pub fn new(db: Option<Database>) -> Result<Self> {
        let validator = BlockValidator::new();

        let stored = match &db {
            Some(db) => db.load_chain()?,
            None => None,
        };

        let blocks = match stored {
            Some(blocks) => {
                validator.validate_chain(&blocks).map_err(|e| {
                    HappeeError::Storage(format!("Stored chain is invalid: {}", e))
                })?;
                log::info!("📦 Loaded chain with {} blocks", blocks.len());
                blocks
            }
            None => {
                let blocks = vec![Block::genesis()];
                if let Some(db) = &db {
                    db.save_chain(&blocks)?;
                }
                log::info!("🌱 Initialized chain at genesis {}", blocks[0].hash);
                blocks
            }
        };

        let utxos = replay(&blocks)
            .map_err(|e| HappeeError::Storage(format!("Stored chain does not replay: {}", e)))?;

        Ok(Self {
            blocks: Arc::new(blocks),
            utxos: Arc::new(utxos),
            pool: TransactionPool::new(),
            db,
            validator,
            difficulty_calc: DifficultyCalculator::new(),
            tip_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn blocks(&self) -> Arc<Vec<Block>> {
        self.blocks.clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn latest_block(&self) -> &Block {
        // Never empty: construction starts from genesis and blocks are only appended or swapped.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn utxos(&self) -> Arc<UtxoSet> {
        self.utxos.clone()
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn current_difficulty(&self) -> u32 {
        self.difficulty_calc.current_difficulty(&self.blocks)
    }

    pub fn accumulated_difficulty(&self) -> u128 {
        accumulated_difficulty(&self.blocks)
    }

    /// Bumped on every tip change.
    pub fn generation(&self) -> u64 {
        self.tip_counter.load(Ordering::Acquire)
    }

    pub fn tip_counter(&self) -> Arc<AtomicU64> {
        self.tip_counter.clone()
    }

    pub fn block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.blocks.iter().find(|block| block.hash == hash)
    }

    pub fn block_by_index(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    /// Looks a transaction up in the chain first, then in the pool.
    /// The flag tells whether it is confirmed.
    pub fn find_transaction(&self, tx_id: &str) -> Option<(Transaction, bool)> {
        self.blocks
            .iter()
            .flat_map(|block| block.data.iter())
            .find(|tx| tx.id == tx_id)
            .map(|tx| (tx.clone(), true))
            .or_else(|| self.pool.get(tx_id).map(|tx| (tx.clone(), false)))
    }

    /// Appends `block` if it extends the tip and its transactions apply.
    /// Nothing changes on failure.
    pub fn add_block(&mut self, block: Block) -> Result<()> {
        self.validator.validate_block(&block, self.latest_block())?;

        let next_utxos = apply_transactions(&block.data, &self.utxos, block.index).map_err(|e| {
            log::warn!("❌ Block {} has invalid transactions: {}", block.index, e);
            e
        })?;

        let mut next_blocks = Vec::with_capacity(self.blocks.len() + 1);
        next_blocks.extend(self.blocks.iter().cloned());
        next_blocks.push(block);

        self.commit(next_blocks, next_utxos)?;
        log::info!("✅ Block {} added to chain", self.latest_block().index);
        Ok(())
    }

    /// Swaps in `candidate` if it is valid and carries strictly more work.
    /// Equal work keeps the current chain.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<()> {
        let candidate_work = accumulated_difficulty(&candidate);
        let current_work = self.accumulated_difficulty();
        if candidate_work <= current_work {
            log::info!(
                "⚖️  Kept current chain: candidate work {} does not exceed {}",
                candidate_work,
                current_work
            );
            return Err(HappeeError::ChainSelectionRejected(format!(
                "Candidate work {} does not exceed current work {}",
                candidate_work, current_work
            )));
        }

        self.validator.validate_chain(&candidate).map_err(|e| {
            log::warn!("❌ Received chain is invalid: {}", e);
            e
        })?;

        let next_utxos = replay(&candidate).map_err(|e| {
            log::warn!("❌ Received chain does not replay: {}", e);
            e
        })?;

        let length = candidate.len();
        self.commit(candidate, next_utxos)?;
        log::info!("🔀 Replaced chain: now {} blocks with work {}", length, candidate_work);
        Ok(())
    }

    pub fn add_to_pool(&mut self, tx: Transaction) -> Result<()> {
        self.pool.add(tx, &self.utxos)
    }

    /// Persists first so a reported success always has a snapshot behind it.
    fn commit(&mut self, blocks: Vec<Block>, utxos: UtxoSet) -> Result<()> {
        // Blocking write under the caller's chain lock. Holding the lock keeps
        // an older snapshot from landing after a newer one.
        if let Some(db) = &self.db {
            db.save_chain(&blocks)?;
        }

        self.blocks = Arc::new(blocks);
        self.utxos = Arc::new(utxos);
        self.pool.reconcile(&self.utxos);
        self.tip_counter.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Rebuilds the UTXO set by applying every block from genesis.
pub fn replay(blocks: &[Block]) -> Result<UtxoSet> {
    blocks.iter().try_fold(UtxoSet::new(), |utxos, block| {
        apply_transactions(&block.data, &utxos, block.index)
    })
}
