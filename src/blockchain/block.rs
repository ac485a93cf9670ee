use std::sync::atomic::AtomicBool;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::encoding::{decode, encode, sha256, HASH_LEN};
use super::pow::{ProofOfWork, ProofOfWorkError};
use super::transaction::Transaction;

/// Errors that can occur while building or decoding a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Proof of work failed: {0}")]
    ProofOfWork(#[from] ProofOfWorkError),

    #[error("Corrupt block encoding: {0}")]
    CorruptEncoding(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Unix timestamp (seconds) when the block was created
    pub timestamp: i64,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block, empty for the genesis block
    pub prev_hash: Vec<u8>,

    /// Proof-of-work hash of this block
    pub hash: Vec<u8>,

    /// Nonce found by the proof of work
    pub nonce: u64,
}

impl Block {
    /// Creates and seals a new block
    ///
    /// # Arguments
    ///
    /// * `transactions` - The list of transactions to include in the block
    /// * `prev_hash` - The hash of the previous block
    pub fn new(transactions: Vec<Transaction>, prev_hash: Vec<u8>) -> Result<Self, BlockError> {
        Block::new_cancellable(transactions, prev_hash, &AtomicBool::new(false))
    }

    /// Same as [`Block::new`], aborting the nonce search once `cancel` is set
    pub fn new_cancellable(
        transactions: Vec<Transaction>,
        prev_hash: Vec<u8>,
        cancel: &AtomicBool,
    ) -> Result<Self, BlockError> {
        let mut block = Block {
            timestamp: Utc::now().timestamp(),
            transactions,
            prev_hash,
            hash: Vec::new(),
            nonce: 0,
        };

        let (nonce, hash) = ProofOfWork::new(&block).run(cancel)?;
        block.nonce = nonce;
        block.hash = hash;

        Ok(block)
    }

    /// Creates the first block of a chain around its coinbase transaction
    pub fn genesis(coinbase: Transaction) -> Result<Self, BlockError> {
        Block::new(vec![coinbase], Vec::new())
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Digest over the concatenated ids of all transactions, in order
    pub fn hash_transactions(&self) -> [u8; HASH_LEN] {
        let ids: Vec<u8> = self
            .transactions
            .iter()
            .flat_map(|tx| tx.id.iter().copied())
            .collect();
        sha256(&ids)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, BlockError> {
        encode(self).map_err(|e| BlockError::SerializationError(e.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, BlockError> {
        decode(bytes).map_err(|e| BlockError::CorruptEncoding(e.to_string()))
    }
}
