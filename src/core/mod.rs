//! Ledger data structures: blocks, transactions, the UTXO set and the pool

pub mod blockchain;
pub mod block;
pub mod pool;
pub mod transaction;
pub mod utxo;

pub use blockchain::Blockchain;
pub use block::Block;
pub use pool::TransactionPool;
pub use transaction::{Transaction, TxIn, TxOut};
pub use utxo::{OutPoint, UnspentTxOut, UtxoSet};
