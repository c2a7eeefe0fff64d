use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::{CliContext, OutputFormat};
use crate::services::consistency_service::ConsistencyService;
use crate::services::rollout_service::{RolloutOptions, RolloutOutcome, RolloutService};

#[derive(Subcommand)]
pub enum SchemaCommands {
    #[command(about = "Validate a SQL statement, then apply it to every tenant database")]
    UpdateAll {
        #[arg(help = "SQL statement to apply (quoted)")]
        sql: String,
    },

    #[command(about = "Report schema-version drift across tenants")]
    CheckConsistency,

    #[command(about = "Print each tenant's latest applied migration version")]
    Versions,
}

pub async fn handle(
    cmd: SchemaCommands,
    ctx: &CliContext,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    match cmd {
        SchemaCommands::UpdateAll { sql } => {
            let service =
                RolloutService::new(ctx.db.clone(), RolloutOptions::from(&ctx.config.rollout));
            let report = service.apply_to_all_tenants(&sql).await?;

            if report.is_empty() {
                return output_empty_collection(
                    &output_format,
                    "results",
                    "No tenant databases found, nothing applied",
                );
            }

            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                OutputFormat::Text => {
                    for result in &report.results {
                        match &result.outcome {
                            RolloutOutcome::Success => println!("✓ {}", result.tenant),
                            RolloutOutcome::Failed(reason) => {
                                println!("✗ {}: {}", result.tenant, reason)
                            }
                            RolloutOutcome::TimedOut => {
                                println!("✗ {}: timed out", result.tenant)
                            }
                        }
                    }
                    println!(
                        "{} succeeded, {} failed",
                        report.successes().count(),
                        report.failures().count()
                    );
                }
            }

            if !report.succeeded() {
                anyhow::bail!(
                    "schema update failed for {} of {} tenants; tenants now disagree on schema \
                     until the statement is re-applied to the failed ones (run 'schema \
                     check-consistency' to audit)",
                    report.failures().count(),
                    report.results.len()
                );
            }
            Ok(())
        }
        SchemaCommands::CheckConsistency => {
            let service = ConsistencyService::new(ctx.db.clone());
            let report = service.check().await?;

            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                OutputFormat::Text => {
                    if report.groups.is_empty() {
                        println!("No tenant databases found");
                    } else if report.is_consistent() {
                        // Exactly one group at this point
                        for (version, tenants) in &report.groups {
                            println!(
                                "✓ All {} reachable tenants at version {}",
                                tenants.len(),
                                version
                            );
                        }
                    } else {
                        println!("Schema drift detected:");
                        for (version, tenants) in &report.groups {
                            let members: Vec<_> =
                                tenants.iter().map(|t| t.as_str()).collect();
                            println!(
                                "  version {}: {} tenant(s) ({})",
                                version,
                                tenants.len(),
                                members.join(", ")
                            );
                        }
                    }
                    for (tenant, error) in &report.unreachable {
                        println!("! {} could not be read: {}", tenant, error);
                    }
                }
            }

            if !report.is_consistent() {
                anyhow::bail!("schema versions are inconsistent across tenants");
            }
            Ok(())
        }
        SchemaCommands::Versions => {
            let service = ConsistencyService::new(ctx.db.clone());
            let (snapshots, failures) = service.versions().await?;

            if snapshots.is_empty() && failures.is_empty() {
                return output_empty_collection(&output_format, "versions", "No tenant databases found");
            }

            match output_format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "versions": snapshots,
                            "unreachable": failures,
                        }))?
                    );
                }
                OutputFormat::Text => {
                    println!("{:<22} {}", "TENANT", "VERSION");
                    println!("{}", "-".repeat(30));
                    for snapshot in &snapshots {
                        println!("{:<22} {}", snapshot.tenant.as_str(), snapshot.latest_version);
                    }
                    for (tenant, error) in &failures {
                        println!("{:<22} unreachable: {}", tenant.as_str(), error);
                    }
                }
            }
            Ok(())
        }
    }
}
