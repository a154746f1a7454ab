//! Sync trigger command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Deserialize;

use crate::client::ApiClient;
use crate::output::{print_info, print_success, OutputFormat};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Application name or ID.
    app: String,
}

#[derive(Debug, Deserialize)]
struct Triggered {
    reason: String,
    #[serde(default)]
    deferred_until: Option<String>,
}

impl SyncCommand {
    pub async fn run(self, client: &ApiClient, _format: OutputFormat) -> Result<()> {
        let triggered: Triggered = client
            .post_empty(&format!("/v1/apps/{}/sync", self.app))
            .await?;

        match triggered.deferred_until {
            Some(until) => {
                print_info(&format!(
                    "Sync for {} deferred to the next window ({})",
                    self.app.bold(),
                    until
                ));
            }
            None => {
                print_success(&format!(
                    "Sync triggered for {} ({})",
                    self.app.bold(),
                    triggered.reason
                ));
            }
        }
        Ok(())
    }
}
