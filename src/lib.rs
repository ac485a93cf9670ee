//! A minimal proof-of-work ledger with unspent-output accounting,
//! persisted in sled.

pub mod blockchain;
pub mod cli;
