use crate::core::{Block, Blockchain, Transaction, UnspentTxOut};
use crate::mining::{BlockData, Miner};
use crate::network::P2PNode;
use crate::storage::Database;
use crate::wallet::wallet::{self, filter_pool_spends, find_unspent_for};
use crate::wallet::Wallet;
use crate::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Owns the node's ledger state and the services around it. The lock is
/// the single point through which every mutation passes.
#[derive(Clone)]
pub struct Node {
    blockchain: Arc<RwLock<Blockchain>>,
    p2p: P2PNode,
    wallet: Wallet,
    miner: Miner,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Node {
    pub fn new(blockchain: Blockchain, wallet: Wallet) -> Result<Self> {
        wallet.ensure_exists()?;

        let blockchain = Arc::new(RwLock::new(blockchain));
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            p2p: P2PNode::new(blockchain.clone()),
            miner: Miner::new(blockchain.clone()),
            blockchain,
            wallet,
            shutdown: Arc::new(shutdown),
        })
    }

    /// Opens the chain store and the wallet under `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let db = Database::new(data_dir.join("chain.db"))?;
        let blockchain = Blockchain::new(Some(db))?;
        Self::new(blockchain, Wallet::new(data_dir))
    }

    pub fn blockchain(&self) -> Arc<RwLock<Blockchain>> {
        self.blockchain.clone()
    }

    pub fn p2p(&self) -> &P2PNode {
        &self.p2p
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn miner(&self) -> &Miner {
        &self.miner
    }

    pub async fn get_blockchain(&self) -> Arc<Vec<Block>> {
        self.blockchain.read().await.blocks()
    }

    pub async fn get_unspent_tx_outs(&self) -> Vec<UnspentTxOut> {
        self.blockchain.read().await.utxos().to_vec()
    }

    pub async fn get_transaction_pool(&self) -> Vec<Transaction> {
        self.blockchain.read().await.pool().snapshot()
    }

    pub async fn get_my_unspent_tx_outs(&self) -> Result<Vec<UnspentTxOut>> {
        let address = self.wallet.address()?;
        let utxos = self.blockchain.read().await.utxos();
        Ok(find_unspent_for(&address, &utxos))
    }

    pub async fn get_block_by_hash(&self, hash: &str) -> Option<Block> {
        self.blockchain.read().await.block_by_hash(hash).cloned()
    }

    pub async fn get_block_by_index(&self, index: u64) -> Option<Block> {
        self.blockchain.read().await.block_by_index(index).cloned()
    }

    /// Returns the transaction and whether it is already in a block.
    pub async fn find_transaction(&self, tx_id: &str) -> Option<(Transaction, bool)> {
        self.blockchain.read().await.find_transaction(tx_id)
    }

    pub async fn difficulty(&self) -> u32 {
        self.blockchain.read().await.current_difficulty()
    }

    pub async fn chain_length(&self) -> usize {
        self.blockchain.read().await.len()
    }

    pub async fn pool_size(&self) -> usize {
        self.blockchain.read().await.pool().len()
    }

    pub fn address(&self) -> Result<String> {
        self.wallet.address()
    }

    pub async fn get_balance(&self, address: &str) -> u64 {
        let utxos = self.blockchain.read().await.utxos();
        wallet::balance(address, &utxos)
    }

    pub async fn get_my_balance(&self) -> Result<u64> {
        let address = self.wallet.address()?;
        Ok(self.get_balance(&address).await)
    }

    /// Mines the pool behind a reward to our wallet, or exactly `data` when given.
    pub async fn mine_block(&self, data: Option<Vec<Transaction>>) -> Result<Block> {
        let data = match data {
            Some(txs) => BlockData::Raw(txs),
            None => BlockData::Pooled {
                reward_address: self.wallet.address()?,
            },
        };

        let block = self.miner.mine(data).await?;
        self.p2p.broadcast_latest().await;
        Ok(block)
    }

    pub async fn mine_raw_block(&self, txs: Vec<Transaction>) -> Result<Block> {
        self.mine_block(Some(txs)).await
    }

    /// Builds, pools and gossips a payment from our wallet.
    pub async fn send_transaction(&self, address: &str, amount: u64) -> Result<Transaction> {
        let key = self.wallet.get()?;
        let tx = {
            let mut chain = self.blockchain.write().await;
            let utxos = chain.utxos();
            let tx = wallet::create_transaction(address, amount, &key, &utxos, &chain.pool().snapshot())?;
            chain.add_to_pool(tx.clone())?;
            tx
        };

        log::info!("💸 Sent {} to {} in transaction {}", amount, address, tx.id);
        self.p2p.broadcast_pool().await;
        Ok(tx)
    }

    /// Spendable view of our own outputs, hiding the ones the pool already claims.
    pub async fn get_my_spendable_tx_outs(&self) -> Result<Vec<UnspentTxOut>> {
        let address = self.wallet.address()?;
        let chain = self.blockchain.read().await;
        Ok(filter_pool_spends(find_unspent_for(&address, &chain.utxos()), &chain.pool().snapshot()))
    }

    pub async fn add_peer(&self, address: &str) -> Result<()> {
        self.p2p.connect(address).await
    }

    pub async fn list_peers(&self) -> Vec<String> {
        self.p2p.list_peers().await
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn stop(&self) {
        log::info!("🛑 Stop requested");
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::COINBASE_AMOUNT;
    use crate::crypto::keys::PrivateKey;
    use crate::HappeeError;
    use tempfile::TempDir;

    fn node_in(dir: &TempDir) -> Node {
        Node::new(Blockchain::new(None).unwrap(), Wallet::new(dir.path())).unwrap()
    }

    #[tokio::test]
    async fn test_mined_reward_is_spendable() {
        let dir = TempDir::new().unwrap();
        let node = node_in(&dir);
        assert_eq!(node.get_my_balance().await.unwrap(), 0);

        let block = node.mine_block(None).await.unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(node.get_my_balance().await.unwrap(), COINBASE_AMOUNT);

        let mine = node.get_my_unspent_tx_outs().await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(node.get_unspent_tx_outs().await.len(), 2);
    }

    #[tokio::test]
    async fn test_payment_settles_after_mining() {
        let dir = TempDir::new().unwrap();
        let node = node_in(&dir);
        let alice = node.address().unwrap();
        let bob = PrivateKey::new().unwrap().address();
        let miner = PrivateKey::new().unwrap().address();

        node.mine_block(None).await.unwrap();
        let tx = node.send_transaction(&bob, 30).await.unwrap();
        assert_eq!(node.get_transaction_pool().await, vec![tx.clone()]);
        assert_eq!(node.find_transaction(&tx.id).await, Some((tx.clone(), false)));
        assert!(node.get_my_spendable_tx_outs().await.unwrap().is_empty());

        let index = node.chain_length().await as u64;
        node.mine_raw_block(vec![Transaction::coinbase(&miner, index), tx.clone()])
            .await
            .unwrap();

        assert_eq!(node.get_balance(&alice).await, 20);
        assert_eq!(node.get_balance(&bob).await, 30);
        assert_eq!(node.get_balance(&miner).await, COINBASE_AMOUNT);
        assert_eq!(node.pool_size().await, 0);
        assert_eq!(node.find_transaction(&tx.id).await, Some((tx, true)));
    }

    #[tokio::test]
    async fn test_overspend_is_refused() {
        let dir = TempDir::new().unwrap();
        let node = node_in(&dir);
        let bob = PrivateKey::new().unwrap().address();

        let err = node.send_transaction(&bob, 1).await.unwrap_err();
        assert!(matches!(err, HappeeError::InsufficientFunds { .. }));
        assert_eq!(node.pool_size().await, 0);
    }

    #[tokio::test]
    async fn test_lookups() {
        let dir = TempDir::new().unwrap();
        let node = node_in(&dir);
        let block = node.mine_block(None).await.unwrap();

        assert_eq!(node.get_block_by_index(1).await, Some(block.clone()));
        assert_eq!(node.get_block_by_hash(&block.hash).await, Some(block));
        assert!(node.get_block_by_index(7).await.is_none());
        assert_eq!(node.get_blockchain().await.len(), 2);
        assert_eq!(node.difficulty().await, 0);
        assert!(node.list_peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_open_creates_store_and_wallet() {
        let dir = TempDir::new().unwrap();
        let node = Node::open(dir.path()).unwrap();
        node.mine_block(None).await.unwrap();

        assert!(dir.path().join("chain.db").exists());
        assert!(node.wallet().exists());
        assert_eq!(node.chain_length().await, 2);
    }

    #[tokio::test]
    async fn test_stop_flips_signal() {
        let dir = TempDir::new().unwrap();
        let node = node_in(&dir);
        let mut signal = node.shutdown_signal();
        node.stop();
        signal.changed().await.unwrap();
        assert!(*signal.borrow());
    }
}
