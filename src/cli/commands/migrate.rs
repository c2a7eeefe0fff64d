use serde_json::json;

use crate::cli::utils::output_success;
use crate::cli::{CliContext, OutputFormat};
use crate::database::migrations::{self, MigrationTarget};

/// Apply the migration set to the central database, including the
/// central-only `auth` superset.
pub async fn handle(ctx: &CliContext, output_format: OutputFormat) -> anyhow::Result<()> {
    let mut conn = ctx.db.admin_pool().acquire().await?;
    let applied = migrations::run_migrations(&mut conn, MigrationTarget::Central).await?;

    let message = if applied.is_empty() {
        "Central database already up to date".to_string()
    } else {
        format!("Applied {} migration(s) to the central database", applied.len())
    };

    output_success(
        &output_format,
        &message,
        Some(json!({ "versions_applied": applied })),
    )
}
