//! Reports schema-version drift across tenant databases.
//!
//! Drift is reported, never auto-repaired: the operator re-applies the
//! missing change to the stragglers and re-checks.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::migrations;
use crate::tenant::TenantId;

/// Version reported for a tenant whose tracker table is empty.
pub const VERSION_NONE: &str = "none";

/// Read-only projection of one tenant's latest applied version. Computed on
/// demand, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaVersionSnapshot {
    pub tenant: TenantId,
    pub latest_version: String,
}

/// Tenants grouped by observed schema version. Consistent iff at most one
/// group exists; unreachable tenants are excluded from the grouping.
#[derive(Debug, Default, Serialize)]
pub struct ConsistencyReport {
    pub groups: BTreeMap<String, Vec<TenantId>>,
    pub unreachable: Vec<(TenantId, String)>,
}

impl ConsistencyReport {
    pub fn from_snapshots(snapshots: Vec<SchemaVersionSnapshot>) -> Self {
        let mut groups: BTreeMap<String, Vec<TenantId>> = BTreeMap::new();
        for snapshot in snapshots {
            groups
                .entry(snapshot.latest_version)
                .or_default()
                .push(snapshot.tenant);
        }
        Self {
            groups,
            unreachable: Vec::new(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.groups.len() <= 1
    }
}

pub struct ConsistencyService {
    db: Arc<DatabaseManager>,
}

impl ConsistencyService {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Latest applied version per tenant. A tenant that cannot be read is
    /// returned in the failure list instead of aborting the whole sweep.
    pub async fn versions(
        &self,
    ) -> Result<(Vec<SchemaVersionSnapshot>, Vec<(TenantId, String)>), DatabaseError> {
        let tenants = self.db.list_tenant_databases().await?;
        let mut snapshots = Vec::with_capacity(tenants.len());
        let mut failures = Vec::new();

        for tenant in tenants {
            match self.read_latest(&tenant).await {
                Ok(latest_version) => snapshots.push(SchemaVersionSnapshot {
                    tenant,
                    latest_version,
                }),
                Err(e) => {
                    warn!(%tenant, "could not read schema version: {e}");
                    failures.push((tenant, e));
                }
            }
        }

        Ok((snapshots, failures))
    }

    /// Group every reachable tenant by observed schema version.
    pub async fn check(&self) -> Result<ConsistencyReport, DatabaseError> {
        let (snapshots, unreachable) = self.versions().await?;
        let mut report = ConsistencyReport::from_snapshots(snapshots);
        report.unreachable = unreachable;
        Ok(report)
    }

    async fn read_latest(&self, tenant: &TenantId) -> Result<String, String> {
        let mut conn = self
            .db
            .connect_tenant(tenant)
            .await
            .map_err(|e| e.to_string())?;
        let latest = migrations::latest_version(&mut conn)
            .await
            .map_err(|e| e.to_string())?;
        Ok(latest.unwrap_or_else(|| VERSION_NONE.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, version: &str) -> SchemaVersionSnapshot {
        SchemaVersionSnapshot {
            tenant: TenantId::new(id).unwrap(),
            latest_version: version.to_string(),
        }
    }

    #[test]
    fn detects_drift_across_versions() {
        let report = ConsistencyReport::from_snapshots(vec![
            snapshot("ab", "003"),
            snapshot("cd", "003"),
            snapshot("ef", "002"),
        ]);
        assert!(!report.is_consistent());
        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.groups["003"].len(), 2);
        assert_eq!(report.groups["002"].len(), 1);
    }

    #[test]
    fn uniform_versions_are_consistent() {
        let report = ConsistencyReport::from_snapshots(vec![
            snapshot("ab", "003"),
            snapshot("cd", "003"),
            snapshot("ef", "003"),
        ]);
        assert!(report.is_consistent());
        assert_eq!(report.groups.len(), 1);
    }

    #[test]
    fn no_tenants_is_consistent() {
        let report = ConsistencyReport::from_snapshots(Vec::new());
        assert!(report.is_consistent());
        assert!(report.groups.is_empty());
    }
}
