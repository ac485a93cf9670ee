// Blockchain module
//
// This module contains the core ledger implementation including:
// - Hashing and encoding helpers
// - Transaction structure
// - Proof of work algorithm
// - Block structure
// - Block storage
// - Blockchain structure and iterator
// - Unspent output resolution

pub mod block;
pub mod chain;
pub mod encoding;
pub mod pow;
pub mod storage;
pub mod transaction;
pub mod utxo;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError, BlockchainIterator};
pub use pow::ProofOfWork;
pub use transaction::{Transaction, TxInput, TxOutput};
