//! Rollout commands: inspect and drive progressive delivery.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::client::ApiClient;
use crate::output::{print_single, print_success, OutputFormat};

#[derive(Debug, Args)]
pub struct RolloutCommand {
    #[command(subcommand)]
    command: RolloutSubcommand,
}

#[derive(Debug, Subcommand)]
enum RolloutSubcommand {
    /// Show the current rollout state.
    Status {
        /// Application name or ID.
        app: String,
    },

    /// Place an operator hold on the rollout.
    Pause {
        /// Application name or ID.
        app: String,
    },

    /// Lift the operator hold and hand control back to automation.
    Resume {
        /// Application name or ID.
        app: String,
    },

    /// Abort the rollout and return all traffic to stable.
    Abort {
        /// Application name or ID.
        app: String,
    },

    /// Force promotion to the next step, skipping analysis.
    Promote {
        /// Application name or ID.
        app: String,
    },
}

impl RolloutCommand {
    pub async fn run(self, client: &ApiClient, format: OutputFormat) -> Result<()> {
        match self.command {
            RolloutSubcommand::Status { app } => {
                let state: serde_json::Value =
                    client.get(&format!("/v1/apps/{app}/rollout")).await?;
                print_single(&state, format);
                Ok(())
            }

            RolloutSubcommand::Pause { app } => command(client, format, &app, "pause").await,
            RolloutSubcommand::Resume { app } => command(client, format, &app, "resume").await,
            RolloutSubcommand::Abort { app } => command(client, format, &app, "abort").await,
            RolloutSubcommand::Promote { app } => command(client, format, &app, "promote").await,
        }
    }
}

async fn command(client: &ApiClient, format: OutputFormat, app: &str, verb: &str) -> Result<()> {
    let state: serde_json::Value = client
        .post_empty(&format!("/v1/apps/{app}/rollout/{verb}"))
        .await?;

    let phase = state
        .get("phase")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let weight = state.get("weight").and_then(|v| v.as_u64()).unwrap_or(0);

    print_success(&format!(
        "Rollout {verb} for {app}: phase {phase}, weight {weight}"
    ));
    print_single(&state, format);
    Ok(())
}
