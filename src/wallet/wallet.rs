use crate::core::{Transaction, TxIn, TxOut, UnspentTxOut, UtxoSet};
use crate::crypto::keys::{is_valid_address, PrivateKey};
use crate::{HappeeError, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Single-key wallet whose private key lives in a hex file under the data directory.
#[derive(Debug, Clone)]
pub struct Wallet {
    key_path: PathBuf,
}

impl Wallet {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            key_path: data_dir.as_ref().join("wallet").join("private_key"),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn exists(&self) -> bool {
        self.key_path.exists()
    }

    /// Generates and stores a key unless one is already present.
    pub fn ensure_exists(&self) -> Result<()> {
        if self.exists() {
            return Ok(());
        }

        if let Some(parent) = self.key_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let key = PrivateKey::new()?;
        fs::write(&self.key_path, key.to_hex())?;
        log::info!("🔑 Created new wallet {}", key.address());
        Ok(())
    }

    pub fn get(&self) -> Result<PrivateKey> {
        let content = fs::read_to_string(&self.key_path).map_err(|e| {
            HappeeError::Wallet(format!("Cannot read key file {}: {}", self.key_path.display(), e))
        })?;
        PrivateKey::from_hex(&content)
    }

    pub fn address(&self) -> Result<String> {
        Ok(self.get()?.address())
    }

    pub fn delete(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.key_path)?;
            log::info!("🗑️  Deleted wallet key {}", self.key_path.display());
        }
        Ok(())
    }
}

pub fn find_unspent_for(address: &str, utxos: &UtxoSet) -> Vec<UnspentTxOut> {
    utxos.for_address(address)
}

pub fn balance(address: &str, utxos: &UtxoSet) -> u64 {
    utxos.balance(address)
}

/// Hides outputs already claimed by pending transactions.
pub fn filter_pool_spends(owned: Vec<UnspentTxOut>, pool: &[Transaction]) -> Vec<UnspentTxOut> {
    let claimed: HashSet<_> = pool.iter().flat_map(|tx| tx.outpoints()).collect();
    owned
        .into_iter()
        .filter(|utxo| !claimed.contains(&utxo.outpoint()))
        .collect()
}

/// Greedy selection in set order. Returns the chosen outputs and the change.
pub fn find_outputs_for_amount(amount: u64, spendable: &[UnspentTxOut]) -> Result<(Vec<UnspentTxOut>, u64)> {
    let mut selected = Vec::new();
    let mut total = 0u64;

    for utxo in spendable {
        selected.push(utxo.clone());
        total = total.saturating_add(utxo.amount);
        if total >= amount {
            return Ok((selected, total - amount));
        }
    }

    Err(HappeeError::InsufficientFunds {
        required: amount,
        available: total,
    })
}

/// Pays `amount` to `receiver` from outputs owned by `key`, sending any
/// remainder back to the key's address, and signs every input.
pub fn create_transaction(
    receiver: &str,
    amount: u64,
    key: &PrivateKey,
    utxos: &UtxoSet,
    pool: &[Transaction],
) -> Result<Transaction> {
    if !is_valid_address(receiver) {
        return Err(HappeeError::InvalidInput(format!("Invalid receiver address: {}", receiver)));
    }
    if amount == 0 {
        return Err(HappeeError::InvalidInput("Amount must be positive".to_string()));
    }

    let my_address = key.address();
    let spendable = filter_pool_spends(find_unspent_for(&my_address, utxos), pool);
    let (inputs, change) = find_outputs_for_amount(amount, &spendable)?;

    let tx_ins = inputs
        .iter()
        .map(|utxo| TxIn::unsigned(utxo.tx_out_transaction_id.clone(), utxo.tx_out_index))
        .collect();

    let mut tx_outs = vec![TxOut::new(receiver, amount)];
    if change > 0 {
        tx_outs.push(TxOut::new(my_address, change));
    }

    let mut tx = Transaction::new(tx_ins, tx_outs);
    for index in 0..tx.tx_ins.len() {
        let signature = tx.sign_input(index, key, utxos)?;
        tx.tx_ins[index].signature = signature;
    }

    log::debug!("💸 Built transaction {} paying {} to {}", tx.id, amount, receiver);
    Ok(tx)
}
