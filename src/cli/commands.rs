use std::io::Write;
use std::path::Path;

use anyhow::Context;
use log::info;

use crate::blockchain::{Blockchain, ProofOfWork};

/// Creates a new blockchain whose genesis reward goes to `address`
pub fn create_blockchain(db: &Path, address: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let blockchain = Blockchain::create(db, address)
        .with_context(|| format!("failed to create blockchain at {}", db.display()))?;
    blockchain.flush()?;

    writeln!(out, "Done!")?;
    Ok(())
}

/// Prints the balance of `address`
pub fn get_balance(db: &Path, address: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let blockchain = open(db)?;
    let balance = blockchain
        .balance(address)
        .with_context(|| format!("failed to compute balance of '{}'", address))?;

    writeln!(out, "Balance of '{}': {}", address, balance)?;
    Ok(())
}

/// Moves `amount` from `from` to `to` in a freshly mined block
pub fn send(db: &Path, from: &str, to: &str, amount: u64, out: &mut dyn Write) -> anyhow::Result<()> {
    let blockchain = open(db)?;
    let block = blockchain
        .send(from, to, amount)
        .with_context(|| format!("failed to send {} from '{}' to '{}'", amount, from, to))?;
    info!("Block {} holds {} transaction(s)", hex::encode(&block.hash), block.transactions.len());

    writeln!(out, "Success! Mined block {}", hex::encode(&block.hash))?;
    Ok(())
}

/// Prints every block from newest to oldest
pub fn print_chain(db: &Path, out: &mut dyn Write) -> anyhow::Result<()> {
    let blockchain = open(db)?;

    for block in blockchain.iter()? {
        let block = block?;

        writeln!(out, "{:<12}: {}", "Prev. hash", hex::encode(&block.prev_hash))?;
        writeln!(out, "{:<12}: {}", "Hash", hex::encode(&block.hash))?;
        writeln!(out, "{:<12}: {}", "Timestamp", block.timestamp)?;
        writeln!(out, "{:<12}: {}", "Nonce", block.nonce)?;
        writeln!(out, "{:<12}: {}", "PoW", ProofOfWork::new(&block).validate())?;

        for transaction in &block.transactions {
            writeln!(out, "  Transaction {}", transaction.id_hex())?;
            for input in &transaction.inputs {
                if transaction.is_coinbase() {
                    writeln!(out, "    coinbase: {}", input.unlocking_token)?;
                } else {
                    writeln!(
                        out,
                        "    in : {}:{} by '{}'",
                        hex::encode(&input.source_txid),
                        input.source_output_index,
                        input.unlocking_token
                    )?;
                }
            }
            for output in &transaction.outputs {
                writeln!(out, "    out: {} to '{}'", output.value, output.locking_token)?;
            }
        }
        writeln!(out)?;
    }

    Ok(())
}

fn open(db: &Path) -> anyhow::Result<Blockchain> {
    Blockchain::open(db).with_context(|| format!("failed to open blockchain at {}", db.display()))
}
