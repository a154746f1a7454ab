//! Application commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{print_output, print_single, print_success, OutputFormat};

#[derive(Debug, Args)]
pub struct AppsCommand {
    #[command(subcommand)]
    command: AppsSubcommand,
}

#[derive(Debug, Subcommand)]
enum AppsSubcommand {
    /// List registered applications.
    List,

    /// Show full status for one application.
    Get {
        /// Application name or ID.
        app: String,
    },

    /// Register an application from a JSON spec file.
    Register {
        /// Path to the application spec (JSON).
        #[arg(short, long)]
        file: std::path::PathBuf,
    },

    /// Deregister an application.
    Deregister {
        /// Application name or ID.
        app: String,

        /// Also delete every managed resource.
        #[arg(long)]
        cascade: bool,
    },
}

/// Row shape for `apps list`.
#[derive(Debug, Serialize, Deserialize, Tabled)]
struct AppRow {
    #[tabled(rename = "NAME")]
    name: String,

    #[tabled(rename = "NAMESPACE")]
    namespace: String,

    #[tabled(rename = "SYNC")]
    sync_status: String,

    #[tabled(rename = "HEALTH")]
    health: String,

    #[tabled(rename = "REVISION")]
    #[serde(default)]
    revision: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    items: Vec<serde_json::Value>,
}

impl AppsCommand {
    pub async fn run(self, client: &ApiClient, format: OutputFormat) -> Result<()> {
        match self.command {
            AppsSubcommand::List => {
                let response: ListResponse = client.get("/v1/apps").await?;
                let rows: Vec<AppRow> = response
                    .items
                    .iter()
                    .map(|item| AppRow {
                        name: field(item, "name"),
                        namespace: field(item, "namespace"),
                        sync_status: field(item, "sync_status"),
                        health: field(item, "health"),
                        revision: short_revision(&field(item, "revision")),
                    })
                    .collect();
                print_output(&rows, format);
                Ok(())
            }

            AppsSubcommand::Get { app } => {
                let status: serde_json::Value = client.get(&format!("/v1/apps/{app}")).await?;
                print_single(&status, format);
                Ok(())
            }

            AppsSubcommand::Register { file } => {
                let contents = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read spec from {:?}", file))?;
                let spec: serde_json::Value = serde_json::from_str(&contents)
                    .with_context(|| format!("Invalid JSON in {:?}", file))?;

                let created: serde_json::Value = client.post("/v1/apps", &spec).await?;
                print_success(&format!(
                    "Registered application {} ({})",
                    field(&created, "name"),
                    field(&created, "id"),
                ));
                Ok(())
            }

            AppsSubcommand::Deregister { app, cascade } => {
                client
                    .delete(&format!("/v1/apps/{app}?cascade={cascade}"))
                    .await?;
                print_success(&format!("Deregistered application {app}"));
                Ok(())
            }
        }
    }
}

fn field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

fn short_revision(revision: &str) -> String {
    let hash = revision.strip_prefix("sha256:").unwrap_or(revision);
    hash.chars().take(12).collect()
}
