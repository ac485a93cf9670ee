use std::path::Path;

use log::warn;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use thiserror::Error;

use super::block::{Block, BlockError};

/// Name of the tree holding `hash -> block` entries and the tip key
pub const BLOCKS_TREE: &str = "blocks";

/// Reserved key holding the hash of the newest block
pub const TIP_KEY: &[u8] = b"l";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Corrupt block encoding: {0}")]
    CorruptEncoding(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Tip moved while the block was being mined")]
    TipMoved,
}

impl From<TransactionError<StorageError>> for StorageError {
    fn from(err: TransactionError<StorageError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StorageError::DatabaseError(e),
        }
    }
}

impl From<BlockError> for StorageError {
    fn from(err: BlockError) -> Self {
        match err {
            BlockError::CorruptEncoding(msg) => StorageError::CorruptEncoding(msg),
            BlockError::SerializationError(msg) => StorageError::SerializationError(msg),
            other => StorageError::SerializationError(other.to_string()),
        }
    }
}

/// Persistent block store
pub struct BlockStore {
    /// The database instance
    db: Db,

    /// Tree for blocks and the tip pointer
    blocks: Tree,
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore").finish()
    }
}

impl BlockStore {
    /// Opens (creating if needed) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// Opens a store that lives in memory and is discarded on drop
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree(BLOCKS_TREE)?;
        Ok(Self { db, blocks })
    }

    /// Gets the hash of the newest block, if the chain has been initialised
    pub fn tip(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blocks.get(TIP_KEY)?.map(|value| value.to_vec()))
    }

    /// Gets a block by its hash
    pub fn get_block(&self, hash: &[u8]) -> Result<Block, StorageError> {
        match self.blocks.get(hash)? {
            Some(value) => Ok(Block::deserialize(&value)?),
            None => Err(StorageError::NotFound(format!(
                "Block with hash {} not found",
                hex::encode(hash)
            ))),
        }
    }

    /// Writes `block` and points the tip at it in one transaction
    ///
    /// # Arguments
    ///
    /// * `block` - The sealed block to store
    /// * `expected_tip` - The tip the block was mined on; the write is aborted
    ///   with `TipMoved` if the stored tip differs
    pub fn append_block(&self, block: &Block, expected_tip: Option<&[u8]>) -> Result<(), StorageError> {
        let value = block.serialize()?;
        let key = block.hash.as_slice();

        let result = self.blocks.transaction(|tx| {
            let current = tx.get(TIP_KEY)?;
            if current.as_deref() != expected_tip {
                return Err(ConflictableTransactionError::Abort(StorageError::TipMoved));
            }

            tx.insert(key, value.as_slice())?;
            tx.insert(TIP_KEY, key)?;
            Ok(())
        });

        if let Err(TransactionError::Abort(StorageError::TipMoved)) = &result {
            warn!(
                "Discarding block {}: tip changed during mining",
                hex::encode(&block.hash)
            );
        }
        result?;

        self.flush()
    }

    /// Stores `block` under an arbitrary key, bypassing the tip
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, key: &[u8], block: &Block) -> Result<(), StorageError> {
        self.blocks.insert(key, block.serialize()?)?;
        Ok(())
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::transaction::Transaction;

    fn genesis() -> Block {
        Block::genesis(Transaction::new_coinbase("miner", "").unwrap()).unwrap()
    }

    #[test]
    fn test_empty_store_has_no_tip() {
        let store = BlockStore::temporary().unwrap();
        assert_eq!(store.tip().unwrap(), None);
    }

    #[test]
    fn test_append_and_get_block() {
        let store = BlockStore::temporary().unwrap();
        let block = genesis();

        store.append_block(&block, None).unwrap();

        assert_eq!(store.tip().unwrap(), Some(block.hash.clone()));
        assert_eq!(store.get_block(&block.hash).unwrap(), block);
    }

    #[test]
    fn test_append_rejects_stale_tip() {
        let store = BlockStore::temporary().unwrap();
        let first = genesis();
        store.append_block(&first, None).unwrap();

        let second = Block::new(
            vec![Transaction::new_coinbase("other", "").unwrap()],
            first.hash.clone(),
        )
        .unwrap();
        let result = store.append_block(&second, None);

        assert!(matches!(result, Err(StorageError::TipMoved)));
        assert_eq!(store.tip().unwrap(), Some(first.hash.clone()));
        assert!(matches!(store.get_block(&second.hash), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_missing_block() {
        let store = BlockStore::temporary().unwrap();
        assert!(matches!(store.get_block(&[1, 2, 3]), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_corrupt_block() {
        let store = BlockStore::temporary().unwrap();
        store.blocks.insert(b"bad", vec![0xffu8, 0x00]).unwrap();

        let err = store.get_block(b"bad").unwrap_err();
        assert!(matches!(err, StorageError::CorruptEncoding(_)));
        assert_eq!(err.to_string().matches("Corrupt block encoding").count(), 1);
    }
}
