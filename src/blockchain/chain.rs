use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, MutexGuard};

use log::{debug, info};
use thiserror::Error;

use super::block::{Block, BlockError};
use super::pow::ProofOfWork;
use super::storage::{BlockStore, StorageError};
use super::transaction::{Transaction, TransactionError};

/// Reward address used when an existing database has no chain yet
pub const PLACEHOLDER_REWARD_ADDRESS: &str = "genesis";

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Blockchain already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("No blockchain found at {0}")]
    NotFound(PathBuf),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Represents the blockchain
///
/// The chain lives entirely in the store: a map from block hash to encoded
/// block plus the tip pointer. Blocks are linked backward through
/// `prev_hash` down to the genesis block.
#[derive(Debug)]
pub struct Blockchain {
    /// Storage for blockchain data
    storage: BlockStore,

    /// Serializes mining so the tip read and the block write form one
    /// critical section
    mining: Mutex<()>,
}

impl Blockchain {
    /// Creates a new blockchain at `path` whose genesis block rewards `address`
    ///
    /// Fails with `AlreadyExists` if a chain is already stored there.
    pub fn create<P: AsRef<Path>>(path: P, address: &str) -> Result<Self, BlockchainError> {
        let path = path.as_ref();
        let storage = BlockStore::open(path)?;
        if storage.tip()?.is_some() {
            return Err(BlockchainError::AlreadyExists(path.to_path_buf()));
        }

        let blockchain = Blockchain::from_storage(storage);
        blockchain.initialize(address)?;
        info!("Created blockchain at {}", path.display());
        Ok(blockchain)
    }

    /// Opens the blockchain stored at `path`
    ///
    /// Fails with `NotFound` if nothing is stored there. A database without a
    /// chain is initialised with [`PLACEHOLDER_REWARD_ADDRESS`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BlockchainError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BlockchainError::NotFound(path.to_path_buf()));
        }

        let blockchain = Blockchain::from_storage(BlockStore::open(path)?);
        match blockchain.storage.tip()? {
            Some(tip) => {
                info!("Opened blockchain at {} with tip {}", path.display(), hex::encode(tip));
            }
            None => {
                info!("No chain in {}, initialising it", path.display());
                blockchain.initialize(PLACEHOLDER_REWARD_ADDRESS)?;
            }
        }
        Ok(blockchain)
    }

    /// Creates a blockchain backed by a temporary in-memory store
    pub fn temporary(address: &str) -> Result<Self, BlockchainError> {
        let blockchain = Blockchain::from_storage(BlockStore::temporary()?);
        blockchain.initialize(address)?;
        Ok(blockchain)
    }

    fn from_storage(storage: BlockStore) -> Self {
        Blockchain {
            storage,
            mining: Mutex::new(()),
        }
    }

    /// Writes the genesis block and the tip in one transaction
    fn initialize(&self, address: &str) -> Result<(), BlockchainError> {
        let coinbase = Transaction::new_coinbase(address, "")?;
        let genesis = Block::genesis(coinbase)?;
        self.storage.append_block(&genesis, None)?;

        info!("Genesis block {} rewards {}", hex::encode(&genesis.hash), address);
        Ok(())
    }

    /// Gets the hash of the newest block
    pub fn tip(&self) -> Result<Vec<u8>, BlockchainError> {
        self.storage
            .tip()?
            .ok_or_else(|| BlockchainError::StorageError(StorageError::NotFound("tip".to_string())))
    }

    /// Mines a new block holding `transactions` on top of the current tip
    ///
    /// # Returns
    ///
    /// Result with the newly mined block
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block, BlockchainError> {
        self.mine_block_cancellable(transactions, &AtomicBool::new(false))
    }

    /// Same as [`Blockchain::mine_block`], giving up once `cancel` is set
    pub fn mine_block_cancellable(
        &self,
        transactions: Vec<Transaction>,
        cancel: &AtomicBool,
    ) -> Result<Block, BlockchainError> {
        let _guard = self.lock_mining()?;
        self.mine_locked(transactions, cancel)
    }

    /// Builds a spend from `from` to `to` and mines it in a new block
    ///
    /// Output selection and mining happen under the same lock, so two sends
    /// from one address never select the same output.
    pub fn send(&self, from: &str, to: &str, amount: u64) -> Result<Block, BlockchainError> {
        let _guard = self.lock_mining()?;
        let transaction = Transaction::new_spend(from, to, amount, self)?;
        debug!("Built transaction {}", transaction.id_hex());
        self.mine_locked(vec![transaction], &AtomicBool::new(false))
    }

    fn lock_mining(&self) -> Result<MutexGuard<'_, ()>, BlockchainError> {
        self.mining
            .lock()
            .map_err(|e| BlockchainError::SystemError(e.to_string()))
    }

    /// Seals and appends a block; the caller holds the mining lock
    fn mine_locked(
        &self,
        transactions: Vec<Transaction>,
        cancel: &AtomicBool,
    ) -> Result<Block, BlockchainError> {
        let tip = self.tip()?;
        debug!("Mining {} transactions on top of {}", transactions.len(), hex::encode(&tip));

        let block = Block::new_cancellable(transactions, tip.clone(), cancel)?;
        self.storage.append_block(&block, Some(&tip))?;

        info!("Mined block {} with nonce {}", hex::encode(&block.hash), block.nonce);
        Ok(block)
    }

    /// Returns an iterator walking from the tip back to the genesis block
    pub fn iter(&self) -> Result<BlockchainIterator<'_>, BlockchainError> {
        Ok(BlockchainIterator {
            storage: &self.storage,
            current_hash: Some(self.tip()?),
        })
    }

    /// Validates the blockchain
    ///
    /// Every block must carry a hash that both meets the target and matches
    /// its contents, and must be referenced by the block above it.
    pub fn is_valid(&self) -> Result<bool, BlockchainError> {
        let mut expected_hash = self.tip()?;

        for block in self.iter()? {
            let block = block?;
            if block.hash != expected_hash || !ProofOfWork::new(&block).validate_strict() {
                return Ok(false);
            }
            expected_hash = block.prev_hash.clone();
        }

        Ok(true)
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), BlockchainError> {
        Ok(self.storage.flush()?)
    }
}

/// Cursor over the chain from newest to oldest block
///
/// Yields the genesis block last and then stops.
pub struct BlockchainIterator<'a> {
    storage: &'a BlockStore,
    current_hash: Option<Vec<u8>>,
}

impl Iterator for BlockchainIterator<'_> {
    type Item = Result<Block, BlockchainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;

        match self.storage.get_block(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current_hash = Some(block.prev_hash.clone());
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}
