//! CLI commands.

mod apps;
mod context;
mod rollouts;
mod sync;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::ApiClient;
use crate::config::Config;
use crate::output::OutputFormat;

/// driftd CLI - Manage applications under continuous reconciliation.
#[derive(Debug, Parser)]
#[command(name = "drift")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// API endpoint override.
    #[arg(long, global = true, env = "DRIFT_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage applications.
    Apps(apps::AppsCommand),

    /// Trigger a sync for an application.
    Sync(sync::SyncCommand),

    /// Inspect and drive progressive rollouts.
    Rollout(rollouts::RolloutCommand),

    /// Show or set the saved CLI context.
    Context(context::ContextCommand),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut config = Config::load()?;
        if let Some(api_url) = &self.api_url {
            config.api_url = api_url.clone();
        }

        let format: OutputFormat = self.format.parse()?;
        let client = ApiClient::new(&config)?;

        match self.command {
            Commands::Apps(cmd) => cmd.run(&client, format).await,
            Commands::Sync(cmd) => cmd.run(&client, format).await,
            Commands::Rollout(cmd) => cmd.run(&client, format).await,
            Commands::Context(cmd) => cmd.run(config).await,
        }
    }
}
