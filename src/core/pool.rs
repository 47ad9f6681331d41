use crate::core::transaction::Transaction;
use crate::core::utxo::{OutPoint, UtxoSet};
use crate::{HappeeError, Result};
use std::collections::HashSet;

/// Pending transactions in arrival order. No two entries share an input.
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transactions: Vec<Transaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// First-seen wins: a transaction touching an input already claimed by
    /// a pool entry is rejected even if it is otherwise valid.
    pub fn add(&mut self, tx: Transaction, utxos: &UtxoSet) -> Result<()> {
        tx.validate_structure()
            .and_then(|_| tx.verify(utxos))
            .map_err(|e| HappeeError::PoolRejected(format!("Invalid transaction {}: {}", tx.id, e)))?;

        if self.transactions.iter().any(|pending| pending.id == tx.id) {
            return Err(HappeeError::PoolRejected(format!("Transaction {} already pooled", tx.id)));
        }

        let claimed = self.claimed_outpoints();
        if let Some(conflict) = tx.outpoints().find(|outpoint| claimed.contains(outpoint)) {
            return Err(HappeeError::PoolRejected(format!(
                "Input {} already spent by a pooled transaction",
                conflict
            )));
        }

        log::debug!("📥 Pooled transaction {}", tx.id);
        self.transactions.push(tx);
        Ok(())
    }

    /// Drops every entry with an input missing from `utxos`. Returns how many went.
    pub fn reconcile(&mut self, utxos: &UtxoSet) -> usize {
        let before = self.transactions.len();
        self.transactions
            .retain(|tx| tx.outpoints().all(|outpoint| utxos.contains(&outpoint)));

        let removed = before - self.transactions.len();
        if removed > 0 {
            log::info!("🧹 Removed {} stale transaction(s) from the pool", removed);
        }
        removed
    }

    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn claimed_outpoints(&self) -> HashSet<OutPoint> {
        self.transactions.iter().flat_map(|tx| tx.outpoints()).collect()
    }

    pub fn get(&self, tx_id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.id == tx_id)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
