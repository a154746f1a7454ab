//! Context command: show or persist the CLI's API endpoint.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::output::{print_info, print_success};

#[derive(Debug, Args)]
pub struct ContextCommand {
    #[command(subcommand)]
    command: ContextSubcommand,
}

#[derive(Debug, Subcommand)]
enum ContextSubcommand {
    /// Show the current context.
    Show,

    /// Set and persist the API endpoint.
    SetApi {
        /// API endpoint URL.
        url: String,
    },
}

impl ContextCommand {
    pub async fn run(self, mut config: Config) -> Result<()> {
        match self.command {
            ContextSubcommand::Show => {
                print_info(&format!("API endpoint: {}", config.api_url()));
                Ok(())
            }
            ContextSubcommand::SetApi { url } => {
                config.api_url = url;
                config.save()?;
                print_success(&format!("API endpoint set to {}", config.api_url()));
                Ok(())
            }
        }
    }
}
