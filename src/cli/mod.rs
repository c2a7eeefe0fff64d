pub mod commands;
pub mod utils;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::database::manager::DatabaseManager;

#[derive(Parser)]
#[command(name = "oilgas")]
#[command(about = "Oilgas admin - tenant database lifecycle and schema rollout")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Tenant database lifecycle")]
    Tenant {
        #[command(subcommand)]
        cmd: commands::tenant::TenantCommands,
    },

    #[command(about = "Cross-tenant schema operations")]
    Schema {
        #[command(subcommand)]
        cmd: commands::schema::SchemaCommands,
    },

    #[command(about = "Migrate the central database (includes the auth schema)")]
    Migrate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Shared command dependencies, constructed once per invocation and passed
/// down by reference.
pub struct CliContext {
    pub config: AppConfig,
    pub db: Arc<DatabaseManager>,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    let config = AppConfig::from_env()?;
    let db = Arc::new(DatabaseManager::connect(&config.database_url).await?);
    let ctx = CliContext { config, db };

    let result = match cli.command {
        Commands::Tenant { cmd } => commands::tenant::handle(cmd, &ctx, output_format).await,
        Commands::Schema { cmd } => commands::schema::handle(cmd, &ctx, output_format).await,
        Commands::Migrate => commands::migrate::handle(&ctx, output_format).await,
    };

    ctx.db.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tenant_create() {
        let cli = Cli::try_parse_from(["oilgas", "tenant", "create", "longbeach"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Tenant {
                cmd: commands::tenant::TenantCommands::Create { .. }
            }
        ));
    }

    #[test]
    fn parses_schema_update_all_with_json_flag() {
        let cli = Cli::try_parse_from([
            "oilgas",
            "schema",
            "update-all",
            "ALTER TABLE store.inventory ADD COLUMN heat_number TEXT",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Schema {
                cmd: commands::schema::SchemaCommands::UpdateAll { .. }
            }
        ));
    }

    #[test]
    fn parses_check_consistency() {
        let cli = Cli::try_parse_from(["oilgas", "schema", "check-consistency"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Schema {
                cmd: commands::schema::SchemaCommands::CheckConsistency
            }
        ));
    }
}
