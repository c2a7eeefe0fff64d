use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::{CliContext, OutputFormat};
use crate::services::tenant_service::TenantService;
use crate::tenant::TenantId;

#[derive(Subcommand)]
pub enum TenantCommands {
    #[command(about = "Provision, migrate and seed a tenant database")]
    Create {
        #[arg(help = "Tenant identifier (2-20 chars: a-z, 0-9, underscore)")]
        tenant_id: String,
    },

    #[command(about = "Destroy a tenant database (asks for confirmation)")]
    Drop {
        #[arg(help = "Tenant identifier")]
        tenant_id: String,
    },

    #[command(about = "Report row counts and last-import time for one tenant")]
    Status {
        #[arg(help = "Tenant identifier")]
        tenant_id: String,
    },

    #[command(about = "List all tenant databases with basic stats")]
    List,
}

pub async fn handle(
    cmd: TenantCommands,
    ctx: &CliContext,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    let service = TenantService::new(ctx.db.clone());

    match cmd {
        TenantCommands::Create { tenant_id } => {
            let tenant = TenantId::new(&tenant_id)?;
            let outcome = service.create(&tenant).await?;

            let message = if outcome.already_existed {
                format!(
                    "Tenant '{}' already existed; migrations brought up to date ({} applied)",
                    tenant,
                    outcome.versions_applied.len()
                )
            } else {
                format!(
                    "Tenant '{}' provisioned as database '{}'",
                    tenant, outcome.database
                )
            };

            output_success(
                &output_format,
                &message,
                Some(json!({
                    "tenant": outcome.tenant,
                    "database": outcome.database,
                    "already_existed": outcome.already_existed,
                    "versions_applied": outcome.versions_applied,
                })),
            )
        }
        TenantCommands::Drop { tenant_id } => {
            let tenant = TenantId::new(&tenant_id)?;

            let prompt = format!(
                "This permanently destroys database '{}' and all its data.",
                tenant.database_name()
            );
            if !confirm_destructive(&prompt)? {
                println!("cancelled");
                return Ok(());
            }

            service.drop_tenant(&tenant).await?;
            output_success(
                &output_format,
                &format!("Tenant '{}' dropped", tenant),
                Some(json!({ "tenant": tenant })),
            )
        }
        TenantCommands::Status { tenant_id } => {
            let tenant = TenantId::new(&tenant_id)?;
            let status = service.status(&tenant).await?;

            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&json!({ "status": status }))?);
                }
                OutputFormat::Text => {
                    println!("Tenant: {}", status.tenant);
                    println!("Database: {}", status.database);
                    println!("Schema version: {}", status.schema_version);
                    println!("Customers: {}", status.customers);
                    println!("Inventory records: {}", status.inventory);
                    println!("Received records: {}", status.received);
                    match status.last_import {
                        Some(at) => println!("Last import: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                        None => println!("Last import: never"),
                    }
                }
            }
            Ok(())
        }
        TenantCommands::List => {
            let summaries = service.list().await?;

            if summaries.is_empty() {
                return output_empty_collection(&output_format, "tenants", "No tenant databases found");
            }

            match output_format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({ "tenants": summaries }))?
                    );
                }
                OutputFormat::Text => {
                    println!(
                        "{:<22} {:<30} {:>10} {:>10} {:>10}",
                        "TENANT", "DATABASE", "CUSTOMERS", "INVENTORY", "RECEIVED"
                    );
                    println!("{}", "-".repeat(86));

                    for summary in &summaries {
                        println!(
                            "{:<22} {:<30} {:>10} {:>10} {:>10}",
                            summary.tenant.as_str(),
                            summary.database,
                            format_count(summary.customers),
                            format_count(summary.inventory),
                            format_count(summary.received),
                        );
                    }
                }
            }
            Ok(())
        }
    }
}

fn format_count(count: Option<i64>) -> String {
    count.map_or_else(|| "-".to_string(), |n| n.to_string())
}
