//! driftctl (drift) - CLI for the driftd control plane.
//!
//! The operator's interface: register applications, trigger syncs,
//! and drive progressive rollouts.

use anyhow::Result;
use clap::Parser;

mod client;
mod commands;
mod config;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Run the command
    if let Err(e) = cli.run().await {
        // Print error in a user-friendly way
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
