use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chain::{Blockchain, BlockchainError};
use super::encoding::{encode, sha256};

/// Amount minted by every coinbase transaction
pub const SUBSIDY: u64 = 10;

/// Output index carried by the sentinel input of a coinbase transaction
pub const COINBASE_OUTPUT_INDEX: i64 = -1;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Value overflow while summing outputs of '{0}'")]
    ValueOverflow(String),

    #[error("Invalid transaction id: {0}")]
    InvalidTxId(#[from] hex::FromHexError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// A quantity claimable by whoever presents `locking_token`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub locking_token: String,
}

impl TxOutput {
    /// Checks if the output can be unlocked with the given token
    pub fn can_be_unlocked_with(&self, token: &str) -> bool {
        self.locking_token == token
    }
}

/// A reference to a single output of an earlier transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction holding the referenced output (empty for coinbase)
    pub source_txid: Vec<u8>,

    /// Index of the referenced output (`-1` for coinbase)
    pub source_output_index: i64,

    /// Authorization token, or free-form data for a coinbase input
    pub unlocking_token: String,
}

impl TxInput {
    /// Checks whether this input was created by the holder of `token`
    pub fn can_unlock_output_with(&self, token: &str) -> bool {
        self.unlocking_token == token
    }

    fn is_coinbase_sentinel(&self) -> bool {
        self.source_txid.is_empty() && self.source_output_index == COINBASE_OUTPUT_INDEX
    }
}

/// Represents a transaction in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content fingerprint, see [`Transaction::compute_id`]
    pub id: Vec<u8>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Builds a transaction from its inputs and outputs and assigns its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Result<Self, TransactionError> {
        let mut transaction = Transaction {
            id: Vec::new(),
            inputs,
            outputs,
        };
        transaction.id = transaction.compute_id()?;
        Ok(transaction)
    }

    /// Creates a new coinbase transaction (mining reward)
    ///
    /// # Arguments
    ///
    /// * `to` - The address receiving the subsidy
    /// * `data` - Free-form data stored in the sentinel input; a reward note is
    ///   used when empty
    pub fn new_coinbase(to: &str, data: &str) -> Result<Self, TransactionError> {
        let data = if data.is_empty() {
            format!("Reward to '{}'", to)
        } else {
            data.to_string()
        };

        let input = TxInput {
            source_txid: Vec::new(),
            source_output_index: COINBASE_OUTPUT_INDEX,
            unlocking_token: data,
        };
        let output = TxOutput {
            value: SUBSIDY,
            locking_token: to.to_string(),
        };

        Transaction::new(vec![input], vec![output])
    }

    /// Creates a transaction moving `amount` from `from` to `to`
    ///
    /// Inputs are selected from the unspent outputs of `from` found in
    /// `chain`. Any surplus is returned to `from` as a change output.
    ///
    /// # Returns
    ///
    /// The new transaction, or `InsufficientFunds` when `from` cannot cover
    /// `amount`
    pub fn new_spend(
        from: &str,
        to: &str,
        amount: u64,
        chain: &Blockchain,
    ) -> Result<Self, BlockchainError> {
        if amount == 0 {
            return Err(TransactionError::InvalidAmount("amount must be positive".to_string()).into());
        }

        let (accumulated, selection) = chain.find_spendable_outputs(from, amount)?;
        if accumulated < amount {
            return Err(TransactionError::InsufficientFunds {
                required: amount,
                available: accumulated,
            }
            .into());
        }

        let mut inputs = Vec::new();
        for (txid_hex, indices) in selection {
            let txid = hex::decode(&txid_hex).map_err(TransactionError::from)?;
            for index in indices {
                inputs.push(TxInput {
                    source_txid: txid.clone(),
                    source_output_index: index as i64,
                    unlocking_token: from.to_string(),
                });
            }
        }

        let mut outputs = vec![TxOutput {
            value: amount,
            locking_token: to.to_string(),
        }];
        if accumulated > amount {
            outputs.push(TxOutput {
                value: accumulated - amount,
                locking_token: from.to_string(),
            });
        }

        Ok(Transaction::new(inputs, outputs)?)
    }

    /// Hashes the canonical encoding of the inputs and outputs.
    /// The `id` field never takes part in its own hash.
    pub fn compute_id(&self) -> Result<Vec<u8>, TransactionError> {
        let encoded = encode(&(&self.inputs, &self.outputs))?;
        Ok(sha256(&encoded).to_vec())
    }

    /// Checks if the transaction is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase_sentinel()
    }

    /// Hex rendering of the id
    pub fn id_hex(&self) -> String {
        hex::encode(&self.id)
    }
}
