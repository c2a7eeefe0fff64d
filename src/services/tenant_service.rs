use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, Row};
use tracing::{info, warn};

use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::migrations::{self, MigrationError, MigrationTarget};
use crate::tenant::{InvalidIdentifier, TenantId};

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),

    #[error("provisioning tenant '{tenant}' failed at {step}: {source}")]
    Provisioning {
        tenant: String,
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Result of an idempotent create: whether the physical database already
/// existed, and which migration versions this invocation applied.
#[derive(Debug, Serialize)]
pub struct CreateOutcome {
    pub tenant: TenantId,
    pub database: String,
    pub already_existed: bool,
    pub versions_applied: Vec<&'static str>,
}

/// One row of `tenant list`. Counts are best-effort: a failed count query
/// yields `None` rather than aborting the listing.
#[derive(Debug, Serialize)]
pub struct TenantSummary {
    pub tenant: TenantId,
    pub database: String,
    pub customers: Option<i64>,
    pub inventory: Option<i64>,
    pub received: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TenantStatus {
    pub tenant: TenantId,
    pub database: String,
    pub customers: i64,
    pub inventory: i64,
    pub received: i64,
    pub last_import: Option<DateTime<Utc>>,
    pub schema_version: String,
}

/// Tenant database lifecycle: create, drop, list, status.
///
/// This service exclusively owns tenant creation and destruction; bulk
/// schema rollouts only ever touch databases that already exist.
pub struct TenantService {
    db: Arc<DatabaseManager>,
}

impl TenantService {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Provision a tenant: create the physical database when absent, run the
    /// full migration set against it, then seed reference data.
    ///
    /// An already-existing database is not an error. No rollback is attempted
    /// on failure; every step is idempotent, so a retried create completes
    /// whatever a failed one left behind.
    pub async fn create(&self, tenant: &TenantId) -> Result<CreateOutcome, TenantError> {
        let database = tenant.database_name();

        let already_existed = self.db.database_exists(&database).await?;
        if already_existed {
            info!(%tenant, "database {} already exists, continuing", database);
        } else {
            self.db
                .create_database(&database)
                .await
                .map_err(|e| provisioning(tenant, "database creation", e))?;
        }

        let mut conn = self
            .db
            .connect_tenant(tenant)
            .await
            .map_err(|e| provisioning(tenant, "connection", e))?;

        let versions_applied = migrations::run_migrations(&mut conn, MigrationTarget::Tenant)
            .await
            .map_err(|e| provisioning(tenant, "migration", e))?;

        migrations::seed_reference_data(&mut conn)
            .await
            .map_err(|e| provisioning(tenant, "seeding", e))?;

        info!(%tenant, applied = versions_applied.len(), "tenant provisioned");
        Ok(CreateOutcome {
            tenant: tenant.clone(),
            database,
            already_existed,
            versions_applied,
        })
    }

    /// Destroy a tenant database. Irreversible; the caller is responsible
    /// for confirmation.
    pub async fn drop_tenant(&self, tenant: &TenantId) -> Result<(), TenantError> {
        self.db.drop_database(&tenant.database_name()).await?;
        Ok(())
    }

    /// Enumerate tenants from the server catalog with best-effort row counts.
    pub async fn list(&self) -> Result<Vec<TenantSummary>, TenantError> {
        let tenants = self.db.list_tenant_databases().await?;
        let mut summaries = Vec::with_capacity(tenants.len());

        for tenant in tenants {
            let (customers, inventory, received) = match self.db.connect_tenant(&tenant).await {
                Ok(mut conn) => {
                    let customers = count_rows(&mut conn, "store.customer").await;
                    let inventory = count_rows(&mut conn, "store.inventory").await;
                    let received = count_rows(&mut conn, "store.received").await;
                    (customers, inventory, received)
                }
                Err(e) => {
                    warn!(%tenant, "could not connect for row counts: {e}");
                    (None, None, None)
                }
            };
            summaries.push(TenantSummary {
                database: tenant.database_name(),
                tenant,
                customers,
                inventory,
                received,
            });
        }

        Ok(summaries)
    }

    /// Row counts, last-import time and schema version for one tenant.
    pub async fn status(&self, tenant: &TenantId) -> Result<TenantStatus, TenantError> {
        let mut conn = self.db.connect_tenant(tenant).await?;

        let customers = count_rows(&mut conn, "store.customer").await.unwrap_or(0);
        let inventory = count_rows(&mut conn, "store.inventory").await.unwrap_or(0);
        let received = count_rows(&mut conn, "store.received").await.unwrap_or(0);

        let last_import = sqlx::query("SELECT max(imported_at) AS last_import FROM store.inventory")
            .fetch_one(&mut conn)
            .await
            .map_err(DatabaseError::from)?
            .get("last_import");

        let schema_version = migrations::latest_version(&mut conn)
            .await?
            .unwrap_or_else(|| "none".to_string());

        Ok(TenantStatus {
            tenant: tenant.clone(),
            database: tenant.database_name(),
            customers,
            inventory,
            received,
            last_import,
            schema_version,
        })
    }
}

fn provisioning(
    tenant: &TenantId,
    step: &'static str,
    source: impl Into<anyhow::Error>,
) -> TenantError {
    TenantError::Provisioning {
        tenant: tenant.to_string(),
        step,
        source: source.into(),
    }
}

async fn count_rows(conn: &mut PgConnection, table: &str) -> Option<i64> {
    // Table names come from a fixed internal list, never from input.
    let query = format!("SELECT COUNT(*) AS n FROM {table}");
    match sqlx::query(&query).fetch_one(conn).await {
        Ok(row) => Some(row.get("n")),
        Err(e) => {
            warn!("count of {table} failed: {e}");
            None
        }
    }
}
