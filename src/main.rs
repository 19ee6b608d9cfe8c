//! Payment replay CLI
//!
//! Replays recorded operations from CSV input and outputs final account
//! states.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- operations.csv > report.csv
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug` or `warn` to control logging verbosity

use payrail::{Replay, ReplayError};
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::process;

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<(), ReplayError> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        return Err(ReplayError::MissingArgument);
    }

    let input_path = &args[1];
    let file = File::open(input_path)?;
    let reader = BufReader::new(file);

    let mut replay = Replay::new();
    replay.process_csv(reader)?;

    let stdout = io::stdout();
    let handle = stdout.lock();
    replay.write_report(handle)?;

    Ok(())
}
