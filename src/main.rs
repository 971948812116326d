//! Ledger settlement CLI
//!
//! Posts a file of transfers against a ledger snapshot through the `hold`
//! escrow account and prints the resulting balances.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- accounts.csv transfers.csv > balances.csv
//! cargo run -- --subscriptions subscriptions.csv --base-uri http://ledger.example \
//!     accounts.csv transfers.csv > balances.csv
//! RUST_LOG=debug cargo run -- --log-format json accounts.csv transfers.csv
//! ```
//!
//! Balances go to stdout as `name,balance`; logs go to stderr.
//!
//! # Exit Codes
//!
//! - 0: Success (individual transfers may still have been rolled back)
//! - 1: Error (unreadable input, missing hold account, output failure, etc.)

use ledger_settlement::{cli, logging, replay};
use std::process;

fn main() {
    let args = cli::parse_args();
    logging::init(args.log_format);

    let config = args.to_replay_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            process::exit(1);
        }
    };

    let mut output = std::io::stdout();
    if let Err(e) = runtime.block_on(replay::run(&config, &mut output)) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
