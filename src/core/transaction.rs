use crate::core::utxo::{OutPoint, UnspentTxOut, UtxoSet};
use crate::crypto::hash::sha256_hex;
use crate::crypto::keys::{is_valid_address, PrivateKey, PublicKey};
use crate::crypto::signatures::{digest_from_hex, Signature};
use crate::{HappeeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Reward minted by the first transaction of every block.
pub const COINBASE_AMOUNT: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxIn {
    pub tx_out_transaction_id: String,
    pub tx_out_index: u32,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub tx_ins: Vec<TxIn>,
    pub tx_outs: Vec<TxOut>,
}

impl TxIn {
    pub fn unsigned(tx_out_transaction_id: impl Into<String>, tx_out_index: u32) -> Self {
        Self {
            tx_out_transaction_id: tx_out_transaction_id.into(),
            tx_out_index,
            signature: String::new(),
        }
    }
}

impl TxOut {
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

impl Transaction {
    /// Builds a transaction with its id filled in. Inputs stay unsigned.
    pub fn new(tx_ins: Vec<TxIn>, tx_outs: Vec<TxOut>) -> Self {
        let id = Self::compute_id(&tx_ins, &tx_outs);
        Self { id, tx_ins, tx_outs }
    }

    /// SHA-256 over every (prior tx id, output index) pair followed by every
    /// (address, amount) pair, numbers in decimal. Signatures are excluded.
    pub fn compute_id(tx_ins: &[TxIn], tx_outs: &[TxOut]) -> String {
        let mut content = String::new();
        for tx_in in tx_ins {
            content.push_str(&tx_in.tx_out_transaction_id);
            content.push_str(&tx_in.tx_out_index.to_string());
        }
        for tx_out in tx_outs {
            content.push_str(&tx_out.address);
            content.push_str(&tx_out.amount.to_string());
        }
        sha256_hex(&content)
    }

    pub fn calculate_id(&self) -> String {
        Self::compute_id(&self.tx_ins, &self.tx_outs)
    }

    /// Reward transaction for the block at `block_index`.
    pub fn coinbase(address: &str, block_index: u64) -> Self {
        // Heights beyond u32 cannot be encoded in a txIn; saturate.
        let index = u32::try_from(block_index).unwrap_or(u32::MAX);
        Self::new(
            vec![TxIn::unsigned("", index)],
            vec![TxOut::new(address, COINBASE_AMOUNT)],
        )
    }

    pub fn total_output(&self) -> Result<u64> {
        self.tx_outs.iter().try_fold(0u64, |acc, out| {
            acc.checked_add(out.amount)
                .ok_or_else(|| HappeeError::Balance(format!("Output sum overflows in {}", self.id)))
        })
    }

    pub fn outpoints(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.tx_ins.iter().map(OutPoint::from)
    }

    /// Shape checks that typing alone does not cover.
    pub fn validate_structure(&self) -> Result<()> {
        for (i, tx_out) in self.tx_outs.iter().enumerate() {
            if !is_valid_address(&tx_out.address) {
                return Err(HappeeError::Structural(format!(
                    "Transaction {} output {} has invalid address",
                    self.id, i
                )));
            }
        }
        Ok(())
    }

    pub fn validate_coinbase(&self, block_index: u64) -> Result<()> {
        if self.calculate_id() != self.id {
            return Err(HappeeError::Structural(format!("Invalid coinbase id {}", self.id)));
        }
        if self.tx_ins.len() != 1 {
            return Err(HappeeError::Structural(
                "Coinbase must have exactly one input".to_string(),
            ));
        }
        let tx_in = &self.tx_ins[0];
        if u64::from(tx_in.tx_out_index) != block_index {
            return Err(HappeeError::Structural(format!(
                "Coinbase input index {} does not match block height {}",
                tx_in.tx_out_index, block_index
            )));
        }
        if !tx_in.signature.is_empty() {
            return Err(HappeeError::Structural("Coinbase input must be unsigned".to_string()));
        }
        if self.tx_outs.len() != 1 {
            return Err(HappeeError::Structural(
                "Coinbase must have exactly one output".to_string(),
            ));
        }
        if self.tx_outs[0].amount != COINBASE_AMOUNT {
            return Err(HappeeError::Balance(format!(
                "Coinbase amount {} differs from reward {}",
                self.tx_outs[0].amount, COINBASE_AMOUNT
            )));
        }
        Ok(())
    }

    /// Full check of a regular transaction against `utxos`.
    pub fn verify(&self, utxos: &UtxoSet) -> Result<()> {
        if self.calculate_id() != self.id {
            return Err(HappeeError::Structural(format!("Invalid transaction id {}", self.id)));
        }
        if self.tx_ins.is_empty() {
            return Err(HappeeError::Structural(format!("Transaction {} has no inputs", self.id)));
        }

        let mut seen = HashSet::new();
        if let Some(repeat) = self.outpoints().find(|outpoint| !seen.insert(outpoint.clone())) {
            return Err(HappeeError::DoubleSpend(format!(
                "Transaction {} spends {} more than once",
                self.id, repeat
            )));
        }

        let digest = digest_from_hex(&self.id)?;
        let mut total_in = 0u64;
        for tx_in in &self.tx_ins {
            let utxo = find_unspent(tx_in, utxos).ok_or_else(|| {
                HappeeError::Reference(format!("Referenced output {} not found", OutPoint::from(tx_in)))
            })?;
            verify_tx_in(tx_in, utxo, &digest)?;
            total_in = total_in
                .checked_add(utxo.amount)
                .ok_or_else(|| HappeeError::Balance(format!("Input sum overflows in {}", self.id)))?;
        }

        let total_out = self.total_output()?;
        if total_in != total_out {
            return Err(HappeeError::Balance(format!(
                "Transaction {} spends {} but outputs {}",
                self.id, total_in, total_out
            )));
        }
        Ok(())
    }

    /// Signs input `index` with `key`, which must own the referenced output.
    pub fn sign_input(&self, index: usize, key: &PrivateKey, utxos: &UtxoSet) -> Result<String> {
        let tx_in = self.tx_ins.get(index).ok_or_else(|| {
            HappeeError::InvalidInput(format!("Transaction {} has no input {}", self.id, index))
        })?;
        let utxo = find_unspent(tx_in, utxos).ok_or_else(|| {
            HappeeError::Reference(format!("Referenced output {} not found", OutPoint::from(tx_in)))
        })?;
        if key.address() != utxo.address {
            return Err(HappeeError::Signature(
                "Signing key does not own the referenced output".to_string(),
            ));
        }

        let digest = digest_from_hex(&self.id)?;
        Ok(key.sign(&digest)?.to_hex())
    }
}

pub fn find_unspent<'a>(tx_in: &TxIn, utxos: &'a UtxoSet) -> Option<&'a UnspentTxOut> {
    utxos.get(&OutPoint::from(tx_in))
}

fn verify_tx_in(tx_in: &TxIn, utxo: &UnspentTxOut, digest: &[u8; 32]) -> Result<()> {
    if tx_in.signature.is_empty() {
        return Err(HappeeError::Signature(format!(
            "Missing signature for {}",
            OutPoint::from(tx_in)
        )));
    }
    let public_key = PublicKey::from_address(&utxo.address)
        .map_err(|e| HappeeError::Signature(e.to_string()))?;
    let signature = Signature::from_hex(&tx_in.signature)?;

    if !public_key.verify(digest, &signature)? {
        return Err(HappeeError::Signature(format!(
            "Signature does not verify for {}",
            OutPoint::from(tx_in)
        )));
    }
    Ok(())
}

/// Runs a block's transactions against `utxos` and returns the next set.
/// `utxos` is never modified; on error nothing has been applied.
pub fn apply_transactions(txs: &[Transaction], utxos: &UtxoSet, block_index: u64) -> Result<UtxoSet> {
    for tx in txs {
        tx.validate_structure()?;
    }

    let coinbase = txs
        .first()
        .ok_or_else(|| HappeeError::Structural("Block carries no coinbase".to_string()))?;
    coinbase.validate_coinbase(block_index)?;

    let mut seen = HashSet::new();
    for outpoint in txs.iter().flat_map(|tx| tx.outpoints()) {
        if !seen.insert(outpoint.clone()) {
            return Err(HappeeError::DoubleSpend(format!(
                "Output {} spent twice in block {}",
                outpoint, block_index
            )));
        }
    }

    for tx in &txs[1..] {
        tx.verify(utxos)?;
    }

    let mut next = utxos.clone();
    for outpoint in txs[1..].iter().flat_map(|tx| tx.outpoints()) {
        next.remove(&outpoint);
    }
    for tx in txs {
        for (index, tx_out) in tx.tx_outs.iter().enumerate() {
            let utxo = UnspentTxOut {
                tx_out_transaction_id: tx.id.clone(),
                tx_out_index: index as u32,
                address: tx_out.address.clone(),
                amount: tx_out.amount,
            };
            if next.insert(utxo).is_some() {
                return Err(HappeeError::DoubleSpend(format!(
                    "Output {}:{} already exists",
                    tx.id, index
                )));
            }
        }
    }

    Ok(next)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Signs every input of an unsigned transaction with one key.
    pub(crate) fn signed(mut tx: Transaction, key: &PrivateKey, utxos: &UtxoSet) -> Transaction {
        let signatures: Vec<String> = (0..tx.tx_ins.len())
            .map(|i| tx.sign_input(i, key, utxos).unwrap())
            .collect();
        for (tx_in, signature) in tx.tx_ins.iter_mut().zip(signatures) {
            tx_in.signature = signature;
        }
        tx
    }

    fn funded(key: &PrivateKey) -> (Transaction, UtxoSet) {
        let coinbase = Transaction::coinbase(&key.address(), 0);
        let utxos = apply_transactions(&[coinbase.clone()], &UtxoSet::new(), 0).unwrap();
        (coinbase, utxos)
    }

    #[test]
    fn test_id_is_order_sensitive_and_stable() {
        let a = TxOut::new(format!("04{}", "a".repeat(128)), 1);
        let b = TxOut::new(format!("04{}", "b".repeat(128)), 2);
        let tx1 = Transaction::new(vec![TxIn::unsigned("ff", 0)], vec![a.clone(), b.clone()]);
        let tx2 = Transaction::new(vec![TxIn::unsigned("ff", 0)], vec![b, a]);
        assert_ne!(tx1.id, tx2.id);

        // Re-serializing with a different key order must not change the id.
        let json = serde_json::json!({
            "txOuts": tx1.tx_outs,
            "txIns": [{ "signature": "", "txOutIndex": 0, "txOutTransactionId": "ff" }],
            "id": tx1.id,
        });
        let restored: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(restored.calculate_id(), tx1.id);
        assert_eq!(restored, tx1);
    }

    #[test]
    fn test_known_coinbase_id() {
        let address = "0459adb367940128264f6c0c1ca5e820f9dec8ce1b996e0f6d80b078fa74d3807e\
                       1781c47da44af71b4a908603765c148de2a75cc23d672b84be1ddb8c4d8a3ef2";
        let coinbase = Transaction::coinbase(address, 0);
        assert_eq!(
            coinbase.id,
            "672eeb79ec07a195bb654fde998897abe3b2cdeac87b98c93e72ec3b756967c8"
        );
    }

    #[test]
    fn test_coinbase_rules() {
        let key = PrivateKey::new().unwrap();
        let coinbase = Transaction::coinbase(&key.address(), 7);
        assert!(coinbase.validate_coinbase(7).is_ok());
        assert!(matches!(coinbase.validate_coinbase(8), Err(HappeeError::Structural(_))));

        let mut rich = coinbase.clone();
        rich.tx_outs[0].amount = 51;
        rich.id = rich.calculate_id();
        assert!(matches!(rich.validate_coinbase(7), Err(HappeeError::Balance(_))));

        let mut signed_coinbase = coinbase.clone();
        signed_coinbase.tx_ins[0].signature = "00".to_string();
        assert!(signed_coinbase.validate_coinbase(7).is_err());
    }

    #[test]
    fn test_structure_rejects_bad_address() {
        let tx = Transaction::new(vec![TxIn::unsigned("ff", 0)], vec![TxOut::new("nope", 1)]);
        assert!(matches!(tx.validate_structure(), Err(HappeeError::Structural(_))));
    }

    #[test]
    fn test_verify_signed_spend() {
        let alice = PrivateKey::new().unwrap();
        let bob = PrivateKey::new().unwrap();
        let (coinbase, utxos) = funded(&alice);

        let tx = Transaction::new(
            vec![TxIn::unsigned(coinbase.id.clone(), 0)],
            vec![TxOut::new(bob.address(), 30), TxOut::new(alice.address(), 20)],
        );
        let tx = signed(tx, &alice, &utxos);
        assert!(tx.verify(&utxos).is_ok());
    }

    #[test]
    fn test_verify_failures() {
        let alice = PrivateKey::new().unwrap();
        let bob = PrivateKey::new().unwrap();
        let (coinbase, utxos) = funded(&alice);

        let unbalanced = Transaction::new(
            vec![TxIn::unsigned(coinbase.id.clone(), 0)],
            vec![TxOut::new(bob.address(), 60)],
        );
        let unbalanced = signed(unbalanced, &alice, &utxos);
        assert!(matches!(unbalanced.verify(&utxos), Err(HappeeError::Balance(_))));

        let dangling = Transaction::new(
            vec![TxIn::unsigned("00".repeat(32), 0)],
            vec![TxOut::new(bob.address(), 50)],
        );
        assert!(matches!(dangling.verify(&utxos), Err(HappeeError::Reference(_))));

        let unsigned = Transaction::new(
            vec![TxIn::unsigned(coinbase.id.clone(), 0)],
            vec![TxOut::new(bob.address(), 50)],
        );
        assert!(matches!(unsigned.verify(&utxos), Err(HappeeError::Signature(_))));

        let mut tampered = signed(unsigned.clone(), &alice, &utxos);
        tampered.tx_outs[0].amount = 49;
        assert!(matches!(tampered.verify(&utxos), Err(HappeeError::Structural(_))));
    }

    #[test]
    fn test_forged_signature_rejected() {
        let alice = PrivateKey::new().unwrap();
        let mallory = PrivateKey::new().unwrap();
        let (coinbase, utxos) = funded(&alice);

        let mut tx = Transaction::new(
            vec![TxIn::unsigned(coinbase.id.clone(), 0)],
            vec![TxOut::new(mallory.address(), 50)],
        );
        assert!(tx.sign_input(0, &mallory, &utxos).is_err());

        let digest = digest_from_hex(&tx.id).unwrap();
        tx.tx_ins[0].signature = mallory.sign(&digest).unwrap().to_hex();
        assert!(matches!(tx.verify(&utxos), Err(HappeeError::Signature(_))));
    }

    #[test]
    fn test_repeated_input_cannot_inflate_value() {
        let alice = PrivateKey::new().unwrap();
        let bob = PrivateKey::new().unwrap();
        let (coinbase, utxos) = funded(&alice);

        let tx_in = TxIn::unsigned(coinbase.id.clone(), 0);
        let doubled = signed(
            Transaction::new(vec![tx_in.clone(), tx_in], vec![TxOut::new(bob.address(), 100)]),
            &alice,
            &utxos,
        );
        assert!(matches!(doubled.verify(&utxos), Err(HappeeError::DoubleSpend(_))));
    }

    #[test]
    fn test_apply_moves_value() {
        let alice = PrivateKey::new().unwrap();
        let bob = PrivateKey::new().unwrap();
        let (coinbase, utxos) = funded(&alice);

        let spend = signed(
            Transaction::new(
                vec![TxIn::unsigned(coinbase.id.clone(), 0)],
                vec![TxOut::new(bob.address(), 30), TxOut::new(alice.address(), 20)],
            ),
            &alice,
            &utxos,
        );
        let reward = Transaction::coinbase(&bob.address(), 1);
        let next = apply_transactions(&[reward, spend], &utxos, 1).unwrap();

        assert_eq!(next.balance(&alice.address()), 20);
        assert_eq!(next.balance(&bob.address()), 80);
        assert_eq!(next.total_value(), 2 * COINBASE_AMOUNT);
        assert!(!next.contains(&OutPoint::new(coinbase.id, 0)));
        // Input set untouched.
        assert_eq!(utxos.balance(&alice.address()), 50);
    }

    #[test]
    fn test_double_spend_within_block_rejected() {
        let alice = PrivateKey::new().unwrap();
        let bob = PrivateKey::new().unwrap();
        let carol = PrivateKey::new().unwrap();
        let (coinbase, utxos) = funded(&alice);

        let to_bob = signed(
            Transaction::new(
                vec![TxIn::unsigned(coinbase.id.clone(), 0)],
                vec![TxOut::new(bob.address(), 50)],
            ),
            &alice,
            &utxos,
        );
        let to_carol = signed(
            Transaction::new(
                vec![TxIn::unsigned(coinbase.id.clone(), 0)],
                vec![TxOut::new(carol.address(), 50)],
            ),
            &alice,
            &utxos,
        );
        assert!(to_bob.verify(&utxos).is_ok());
        assert!(to_carol.verify(&utxos).is_ok());

        let reward = Transaction::coinbase(&alice.address(), 1);
        let result = apply_transactions(&[reward, to_bob, to_carol], &utxos, 1);
        assert!(matches!(result, Err(HappeeError::DoubleSpend(_))));
    }

    #[test]
    fn test_apply_requires_coinbase_first() {
        let alice = PrivateKey::new().unwrap();
        assert!(matches!(
            apply_transactions(&[], &UtxoSet::new(), 1),
            Err(HappeeError::Structural(_))
        ));

        let wrong_height = Transaction::coinbase(&alice.address(), 3);
        assert!(apply_transactions(&[wrong_height], &UtxoSet::new(), 1).is_err());
    }
}
