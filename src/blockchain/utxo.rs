//! Unspent output resolution by scanning the chain from tip to genesis.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::debug;

use super::chain::{Blockchain, BlockchainError};
use super::transaction::{Transaction, TransactionError, TxOutput};

/// A transaction holding outputs still spendable by the scanned address
#[derive(Debug, Clone)]
pub struct UnspentTransaction {
    pub transaction: Transaction,

    /// Indices of the outputs that are unspent and unlockable by the address
    pub output_indices: Vec<usize>,
}

impl UnspentTransaction {
    pub fn outputs(&self) -> impl Iterator<Item = (usize, &TxOutput)> + '_ {
        self.output_indices
            .iter()
            .map(move |&index| (index, &self.transaction.outputs[index]))
    }
}

impl Blockchain {
    /// Finds the transactions holding unspent outputs locked to `address`
    ///
    /// Blocks are visited newest first, so every input spending an output is
    /// recorded before the transaction that created the output is reached.
    pub fn find_unspent_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<UnspentTransaction>, BlockchainError> {
        let mut unspent = Vec::new();
        // txid hex -> spent output indices
        let mut spent: HashMap<String, HashSet<i64>> = HashMap::new();

        for block in self.iter()? {
            let block = block?;

            for transaction in &block.transactions {
                let txid = transaction.id_hex();
                let spent_here = spent.get(&txid);

                let output_indices: Vec<usize> = transaction
                    .outputs
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| {
                        !spent_here.map_or(false, |indices| indices.contains(&(*index as i64)))
                    })
                    .filter(|(_, output)| output.can_be_unlocked_with(address))
                    .map(|(index, _)| index)
                    .collect();

                if !output_indices.is_empty() {
                    unspent.push(UnspentTransaction {
                        transaction: transaction.clone(),
                        output_indices,
                    });
                }

                if !transaction.is_coinbase() {
                    for input in &transaction.inputs {
                        if input.can_unlock_output_with(address) {
                            spent
                                .entry(hex::encode(&input.source_txid))
                                .or_default()
                                .insert(input.source_output_index);
                        }
                    }
                }
            }
        }

        debug!("{} has {} transactions with unspent outputs", address, unspent.len());
        Ok(unspent)
    }

    /// Lists every unspent output locked to `address`
    pub fn find_unspent_outputs(&self, address: &str) -> Result<Vec<TxOutput>, BlockchainError> {
        Ok(self
            .find_unspent_transactions(address)?
            .iter()
            .flat_map(|unspent| unspent.outputs().map(|(_, output)| output.clone()))
            .collect())
    }

    /// Selects unspent outputs of `address` until they cover `amount`
    ///
    /// # Returns
    ///
    /// The accumulated value and the selected output indices keyed by txid
    /// hex. The accumulated value is below `amount` when the address cannot
    /// cover it.
    pub fn find_spendable_outputs(
        &self,
        address: &str,
        amount: u64,
    ) -> Result<(u64, BTreeMap<String, Vec<usize>>), BlockchainError> {
        let mut accumulated = 0u64;
        let mut selection: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        'scan: for unspent in self.find_unspent_transactions(address)? {
            let txid = unspent.transaction.id_hex();

            for (index, output) in unspent.outputs() {
                if accumulated >= amount {
                    break 'scan;
                }
                accumulated = accumulated
                    .checked_add(output.value)
                    .ok_or_else(|| TransactionError::ValueOverflow(address.to_string()))?;
                selection.entry(txid.clone()).or_default().push(index);
            }
        }

        Ok((accumulated, selection))
    }

    /// Sums the unspent outputs locked to `address`
    pub fn balance(&self, address: &str) -> Result<u64, BlockchainError> {
        self.find_unspent_outputs(address)?
            .iter()
            .try_fold(0u64, |total, output| total.checked_add(output.value))
            .ok_or_else(|| TransactionError::ValueOverflow(address.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::transaction::{TxInput, SUBSIDY};

    fn send(blockchain: &Blockchain, from: &str, to: &str, amount: u64) {
        let transaction = Transaction::new_spend(from, to, amount, blockchain).unwrap();
        blockchain.mine_block(vec![transaction]).unwrap();
    }

    #[test]
    fn test_fresh_chain_balances() {
        let blockchain = Blockchain::temporary("alice").unwrap();

        assert_eq!(blockchain.balance("alice").unwrap(), SUBSIDY);
        assert_eq!(blockchain.balance("bob").unwrap(), 0);
    }

    #[test]
    fn test_spend_moves_exact_amount() {
        let blockchain = Blockchain::temporary("alice").unwrap();
        let tip = blockchain.tip().unwrap();

        send(&blockchain, "alice", "bob", 3);

        assert_eq!(blockchain.balance("alice").unwrap(), SUBSIDY - 3);
        assert_eq!(blockchain.balance("bob").unwrap(), 3);
        assert_ne!(blockchain.tip().unwrap(), tip);
    }

    #[test]
    fn test_spend_creates_change_output() {
        let blockchain = Blockchain::temporary("alice").unwrap();
        let transaction = Transaction::new_spend("alice", "bob", 4, &blockchain).unwrap();

        assert_eq!(transaction.inputs.len(), 1);
        assert_eq!(transaction.inputs[0].source_output_index, 0);
        assert_eq!(transaction.inputs[0].unlocking_token, "alice");
        assert_eq!(
            transaction.outputs,
            vec![
                TxOutput { value: 4, locking_token: "bob".to_string() },
                TxOutput { value: SUBSIDY - 4, locking_token: "alice".to_string() },
            ]
        );
    }

    #[test]
    fn test_spend_of_whole_balance_has_no_change() {
        let blockchain = Blockchain::temporary("alice").unwrap();
        let transaction = Transaction::new_spend("alice", "bob", SUBSIDY, &blockchain).unwrap();

        assert_eq!(transaction.outputs.len(), 1);

        blockchain.mine_block(vec![transaction]).unwrap();
        assert_eq!(blockchain.balance("alice").unwrap(), 0);
        assert_eq!(blockchain.balance("bob").unwrap(), SUBSIDY);
    }

    #[test]
    fn test_insufficient_funds() {
        let blockchain = Blockchain::temporary("alice").unwrap();

        let (accumulated, _) = blockchain.find_spendable_outputs("alice", SUBSIDY + 1).unwrap();
        assert!(accumulated < SUBSIDY + 1);

        let tip = blockchain.tip().unwrap();
        let result = Transaction::new_spend("alice", "bob", SUBSIDY + 1, &blockchain);
        assert!(matches!(
            result,
            Err(BlockchainError::TransactionError(TransactionError::InsufficientFunds {
                required: 11,
                available: 10,
            }))
        ));
        assert_eq!(blockchain.tip().unwrap(), tip);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let blockchain = Blockchain::temporary("alice").unwrap();
        let result = Transaction::new_spend("alice", "bob", 0, &blockchain);
        assert!(matches!(
            result,
            Err(BlockchainError::TransactionError(TransactionError::InvalidAmount(_)))
        ));
    }

    #[test]
    fn test_sequential_spends() {
        let blockchain = Blockchain::temporary("alice").unwrap();

        send(&blockchain, "alice", "bob", 4);
        let after_first = blockchain.tip().unwrap();
        send(&blockchain, "alice", "carol", 5);

        let blocks: Vec<_> = blockchain.iter().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].prev_hash, after_first);

        assert_eq!(blockchain.balance("alice").unwrap(), 1);
        assert_eq!(blockchain.balance("bob").unwrap(), 4);
        assert_eq!(blockchain.balance("carol").unwrap(), 5);
    }

    #[test]
    fn test_spent_outputs_are_not_reused() {
        let blockchain = Blockchain::temporary("alice").unwrap();
        send(&blockchain, "alice", "bob", 4);
        send(&blockchain, "bob", "alice", 1);

        // alice holds her change (6) and bob's payment (1)
        let unspent = blockchain.find_unspent_transactions("alice").unwrap();
        let outputs: usize = unspent.iter().map(|u| u.output_indices.len()).sum();
        assert_eq!(outputs, 2);
        assert_eq!(blockchain.balance("alice").unwrap(), 7);
        assert_eq!(blockchain.balance("bob").unwrap(), 3);

        // the genesis coinbase is spent and must not be selected again
        let genesis = blockchain.iter().unwrap().last().unwrap().unwrap();
        let (accumulated, selection) = blockchain.find_spendable_outputs("alice", 7).unwrap();
        assert_eq!(accumulated, 7);
        assert!(!selection.contains_key(&genesis.transactions[0].id_hex()));
    }

    #[test]
    fn test_spendable_selection_stops_when_covered() {
        let blockchain = Blockchain::temporary("alice").unwrap();
        blockchain
            .mine_block(vec![Transaction::new_coinbase("alice", "second reward").unwrap()])
            .unwrap();
        assert_eq!(blockchain.balance("alice").unwrap(), 2 * SUBSIDY);

        let (accumulated, selection) = blockchain.find_spendable_outputs("alice", 5).unwrap();
        assert_eq!(accumulated, SUBSIDY);
        assert_eq!(selection.values().map(Vec::len).sum::<usize>(), 1);

        let (accumulated, selection) = blockchain.find_spendable_outputs("alice", 15).unwrap();
        assert_eq!(accumulated, 2 * SUBSIDY);
        assert_eq!(selection.len(), 2);
    }

    fn mint(blockchain: &Blockchain, to: &str, value: u64, note: &str) {
        let transaction = Transaction::new(
            vec![TxInput {
                source_txid: Vec::new(),
                source_output_index: -1,
                unlocking_token: note.to_string(),
            }],
            vec![TxOutput { value, locking_token: to.to_string() }],
        )
        .unwrap();
        blockchain.mine_block(vec![transaction]).unwrap();
    }

    fn is_overflow(result: Result<impl std::fmt::Debug, BlockchainError>) -> bool {
        matches!(
            result,
            Err(BlockchainError::TransactionError(TransactionError::ValueOverflow(_)))
        )
    }

    #[test]
    fn test_balance_overflow_is_an_error() {
        let blockchain = Blockchain::temporary("genesis").unwrap();
        mint(&blockchain, "alice", u64::MAX, "first");
        mint(&blockchain, "alice", u64::MAX, "second");

        assert!(is_overflow(blockchain.balance("alice")));
        // one output already covers the amount, so selection stops before summing
        assert_eq!(blockchain.find_spendable_outputs("alice", u64::MAX).unwrap().0, u64::MAX);
    }

    #[test]
    fn test_spendable_overflow_is_an_error() {
        let blockchain = Blockchain::temporary("genesis").unwrap();
        mint(&blockchain, "alice", u64::MAX, "large");
        mint(&blockchain, "alice", 5, "small");

        // newest first: 5 does not cover 10, adding u64::MAX overflows
        assert!(is_overflow(blockchain.find_spendable_outputs("alice", 10)));
        assert!(is_overflow(Transaction::new_spend("alice", "bob", 10, &blockchain)));
    }

    #[test]
    fn test_self_send_keeps_balance() {
        let blockchain = Blockchain::temporary("alice").unwrap();
        send(&blockchain, "alice", "alice", 4);

        // both outputs of the self-send belong to alice and count once each
        let unspent = blockchain.find_unspent_transactions("alice").unwrap();
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].output_indices, vec![0, 1]);
        assert_eq!(blockchain.balance("alice").unwrap(), SUBSIDY);
    }
}
