use crate::core::Block;
use crate::{HappeeError, Result};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;

// Database tree names
const TREE_CHAIN: &str = "chain";

const KEY_SNAPSHOT: &[u8] = b"snapshot";

/// Full-snapshot chain store: every save overwrites the whole block list.
#[derive(Debug, Clone)]
pub struct Database {
    db: Arc<Db>,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| HappeeError::Storage(format!("Failed to open database: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
        })
    }

    fn get_tree(&self, tree_name: &str) -> Result<Tree> {
        self.db.open_tree(tree_name)
            .map_err(|e| HappeeError::Storage(format!("Failed to open tree {}: {}", tree_name, e)))
    }

    /// Overwrites the snapshot and waits for it to reach disk.
    pub fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        let chain_tree = self.get_tree(TREE_CHAIN)?;
        let data = serde_json::to_vec(blocks)?;

        chain_tree.insert(KEY_SNAPSHOT, data)
            .map_err(|e| HappeeError::Storage(format!("Failed to save chain: {}", e)))?;
        self.flush()?;

        log::debug!("💾 Saved chain snapshot ({} blocks)", blocks.len());
        Ok(())
    }

    pub fn load_chain(&self) -> Result<Option<Vec<Block>>> {
        let chain_tree = self.get_tree(TREE_CHAIN)?;

        match chain_tree.get(KEY_SNAPSHOT)
            .map_err(|e| HappeeError::Storage(format!("Failed to read chain: {}", e)))? {
            Some(data) => {
                let blocks: Vec<Block> = serde_json::from_slice(&data)
                    .map_err(|e| HappeeError::Storage(format!("Corrupt chain snapshot: {}", e)))?;
                Ok(Some(blocks))
            }
            None => Ok(None),
        }
    }

    pub fn clear_chain(&self) -> Result<()> {
        let chain_tree = self.get_tree(TREE_CHAIN)?;
        chain_tree.remove(KEY_SNAPSHOT)?;
        self.flush()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()
            .map_err(|e| HappeeError::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}
