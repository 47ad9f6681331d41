use crate::core::transaction::TxIn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key of an unspent output: output `index` of transaction `tx_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_id: String,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_id: impl Into<String>, index: u32) -> Self {
        Self {
            tx_id: tx_id.into(),
            index,
        }
    }
}

impl From<&TxIn> for OutPoint {
    fn from(tx_in: &TxIn) -> Self {
        Self::new(tx_in.tx_out_transaction_id.clone(), tx_in.tx_out_index)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnspentTxOut {
    pub tx_out_transaction_id: String,
    pub tx_out_index: u32,
    pub address: String,
    pub amount: u64,
}

impl UnspentTxOut {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_out_transaction_id.clone(), self.tx_out_index)
    }
}

/// Spendable outputs keyed by outpoint. Iteration order is the key order,
/// so every node walks the set identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    entries: BTreeMap<OutPoint, UnspentTxOut>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&UnspentTxOut> {
        self.entries.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnspentTxOut> {
        self.entries.values()
    }

    pub fn to_vec(&self) -> Vec<UnspentTxOut> {
        self.entries.values().cloned().collect()
    }

    pub fn for_address(&self, address: &str) -> Vec<UnspentTxOut> {
        self.entries
            .values()
            .filter(|utxo| utxo.address == address)
            .cloned()
            .collect()
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.entries
            .values()
            .filter(|utxo| utxo.address == address)
            .fold(0u64, |acc, utxo| acc.saturating_add(utxo.amount))
    }

    pub fn total_value(&self) -> u64 {
        self.entries
            .values()
            .fold(0u64, |acc, utxo| acc.saturating_add(utxo.amount))
    }

    // Mutation is reserved for the block-application pipeline.
    pub(crate) fn insert(&mut self, utxo: UnspentTxOut) -> Option<UnspentTxOut> {
        self.entries.insert(utxo.outpoint(), utxo)
    }

    pub(crate) fn remove(&mut self, outpoint: &OutPoint) -> Option<UnspentTxOut> {
        self.entries.remove(outpoint)
    }
}

impl FromIterator<UnspentTxOut> for UtxoSet {
    fn from_iter<I: IntoIterator<Item = UnspentTxOut>>(iter: I) -> Self {
        let mut set = UtxoSet::new();
        for utxo in iter {
            set.insert(utxo);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(tx_id: &str, index: u32, address: &str, amount: u64) -> UnspentTxOut {
        UnspentTxOut {
            tx_out_transaction_id: tx_id.to_string(),
            tx_out_index: index,
            address: address.to_string(),
            amount,
        }
    }

    #[test]
    fn test_keyed_by_outpoint() {
        let mut set = UtxoSet::new();
        set.insert(utxo("aa", 0, "alice", 10));
        set.insert(utxo("aa", 1, "bob", 5));
        let previous = set.insert(utxo("aa", 0, "alice", 12));

        assert_eq!(previous.map(|u| u.amount), Some(10));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&OutPoint::new("aa", 1)));
        assert!(!set.contains(&OutPoint::new("aa", 2)));
    }

    #[test]
    fn test_balance_and_filter() {
        let set: UtxoSet = vec![
            utxo("aa", 0, "alice", 10),
            utxo("bb", 0, "alice", 15),
            utxo("cc", 3, "bob", 7),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.balance("alice"), 25);
        assert_eq!(set.balance("bob"), 7);
        assert_eq!(set.balance("carol"), 0);
        assert_eq!(set.for_address("alice").len(), 2);
        assert_eq!(set.total_value(), 32);
    }

    #[test]
    fn test_remove() {
        let mut set: UtxoSet = vec![utxo("aa", 0, "alice", 10)].into_iter().collect();
        assert!(set.remove(&OutPoint::new("aa", 0)).is_some());
        assert!(set.remove(&OutPoint::new("aa", 0)).is_none());
        assert!(set.is_empty());
    }
}
