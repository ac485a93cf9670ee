// CLI module
//
// This module contains the command-line surface of the ledger

pub mod commands;

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Default location of the ledger database
pub const DEFAULT_DB_PATH: &str = "data/blockchain";

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path of the ledger database
    #[arg(long, global = true, env = "LEDGER_DB", default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Creates a blockchain and sends the genesis reward to ADDRESS
    #[command(name = "createblockchain")]
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },
    /// Prints the balance of ADDRESS
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long)]
        address: String,
    },
    /// Sends AMOUNT coins from FROM to TO and mines the transaction
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        amount: u64,
    },
    /// Prints every block from the tip down to the genesis block
    #[command(name = "printchain")]
    PrintChain,
}

/// Runs the parsed command, writing user-facing output to `out`
pub fn run(cli: &Cli, out: &mut dyn Write) -> anyhow::Result<()> {
    match &cli.command {
        Commands::CreateBlockchain { address } => commands::create_blockchain(&cli.db, address, out),
        Commands::GetBalance { address } => commands::get_balance(&cli.db, address, out),
        Commands::Send { from, to, amount } => commands::send(&cli.db, from, to, *amount, out),
        Commands::PrintChain => commands::print_chain(&cli.db, out),
    }
}

/// Writes a failed command's error chain for the user
pub fn report(err: &anyhow::Error, err_out: &mut dyn Write) {
    // nothing left to report to if stderr itself fails
    let _ = writeln!(err_out, "Error: {:#}", err);
}
