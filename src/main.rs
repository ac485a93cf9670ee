use clap::Parser;
use log::error;

use utxo_ledger::cli::{self, Cli};

fn main() {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();

    if let Err(err) = cli::run(&cli, &mut stdout) {
        error!("{:#}", err);
        cli::report(&err, &mut std::io::stderr());
        std::process::exit(1);
    }
}
