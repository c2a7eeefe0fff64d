//! Applies an operator-supplied schema change to every tenant database.
//!
//! The statement is first proven against one tenant inside a transaction
//! that is always rolled back; only then is it executed per tenant, with a
//! semaphore bounding how many tenant tasks run at once. Tenant databases
//! are isolated, so a rollout is best-effort per tenant, never atomic
//! across tenants: one tenant's failure neither blocks nor rolls back the
//! others, and the report always carries every tenant's outcome.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use sqlx::Connection;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::config::RolloutConfig;
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::tenant::TenantId;

#[derive(Debug, Error)]
pub enum RolloutError {
    /// The dry-run phase failed; the rollout was aborted before any tenant
    /// was touched.
    #[error("statement failed validation against tenant '{tenant}': {reason}")]
    Validation { tenant: TenantId, reason: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Per-tenant outcome of one rollout invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum RolloutOutcome {
    Success,
    Failed(String),
    /// The task could not finish (or be admitted) before the rollout
    /// deadline. The tenant may or may not have committed.
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct RolloutResult {
    pub tenant: TenantId,
    pub outcome: RolloutOutcome,
}

/// The operator-visible report: one result per tenant, never partially
/// discarded.
#[derive(Debug, Default, Serialize)]
pub struct RolloutReport {
    pub results: Vec<RolloutResult>,
}

impl RolloutReport {
    pub fn succeeded(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn successes(&self) -> impl Iterator<Item = &RolloutResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == RolloutOutcome::Success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RolloutResult> {
        self.results
            .iter()
            .filter(|r| r.outcome != RolloutOutcome::Success)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Tuning for one rollout invocation, taken from [`RolloutConfig`].
#[derive(Debug, Clone)]
pub struct RolloutOptions {
    pub concurrency: usize,
    pub timeout: std::time::Duration,
}

impl From<&RolloutConfig> for RolloutOptions {
    fn from(config: &RolloutConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            timeout: config.timeout,
        }
    }
}

pub struct RolloutService {
    db: Arc<DatabaseManager>,
    options: RolloutOptions,
}

impl RolloutService {
    pub fn new(db: Arc<DatabaseManager>, options: RolloutOptions) -> Self {
        Self { db, options }
    }

    /// Validate, then apply one SQL statement to every tenant database.
    /// Returns the full per-tenant report; an empty tenant set yields an
    /// empty report without touching anything.
    pub async fn apply_to_all_tenants(&self, sql: &str) -> Result<RolloutReport, RolloutError> {
        let tenants = self.db.list_tenant_databases().await?;
        if tenants.is_empty() {
            info!("no tenant databases found, nothing to roll out");
            return Ok(RolloutReport::default());
        }

        let sql: Arc<str> = Arc::from(sql);
        let db = self.db.clone();
        let validate = {
            let db = db.clone();
            let sql = sql.clone();
            move |tenant: TenantId| async move { dry_run(&db, &tenant, &sql).await }
        };
        let worker = {
            move |tenant: TenantId| {
                let db = db.clone();
                let sql = sql.clone();
                async move { execute_on_tenant(&db, &tenant, &sql).await }
            }
        };

        run_rollout(tenants, self.options.clone(), validate, worker).await
    }
}

/// Dry run: execute inside a transaction and unconditionally roll back.
/// Proves the statement applies without mutating any data.
async fn dry_run(db: &DatabaseManager, tenant: &TenantId, sql: &str) -> Result<(), String> {
    let mut conn = db.connect_tenant(tenant).await.map_err(|e| e.to_string())?;
    let mut tx = conn.begin().await.map_err(|e| e.to_string())?;
    sqlx::query(sql)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.to_string())?;
    tx.rollback().await.map_err(|e| e.to_string())?;
    Ok(())
}

/// Execute and commit the statement on one tenant, over a connection owned
/// by this task alone.
async fn execute_on_tenant(db: &DatabaseManager, tenant: &TenantId, sql: &str) -> Result<(), String> {
    let mut conn = db.connect_tenant(tenant).await.map_err(|e| e.to_string())?;
    let mut tx = conn.begin().await.map_err(|e| e.to_string())?;
    sqlx::query(sql)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.to_string())?;
    tx.commit().await.map_err(|e| e.to_string())?;
    Ok(())
}

/// Orchestrates one rollout: validation against the first tenant, then the
/// bounded execution phase. Generic over the validation and worker closures
/// so the phases can be exercised with simulated tenants.
pub async fn run_rollout<V, VFut, F, Fut>(
    tenants: Vec<TenantId>,
    options: RolloutOptions,
    validate: V,
    worker: F,
) -> Result<RolloutReport, RolloutError>
where
    V: FnOnce(TenantId) -> VFut,
    VFut: Future<Output = Result<(), String>>,
    F: Fn(TenantId) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    let Some(first) = tenants.first().cloned() else {
        return Ok(RolloutReport::default());
    };

    if let Err(reason) = validate(first.clone()).await {
        warn!(tenant = %first, "rollout validation failed, no tenant touched");
        return Err(RolloutError::Validation {
            tenant: first,
            reason,
        });
    }
    info!(tenant = %first, "statement validated via dry run");

    let results = execute_bounded(tenants, &options, worker).await;
    Ok(RolloutReport { results })
}

/// Execution phase: one task per tenant, admission bounded by a semaphore,
/// every task reporting exactly one result. The join barrier guarantees the
/// caller never sees a partial result set; tasks that miss the rollout
/// deadline report `TimedOut` rather than being lost.
pub async fn execute_bounded<F, Fut>(
    tenants: Vec<TenantId>,
    options: &RolloutOptions,
    worker: F,
) -> Vec<RolloutResult>
where
    F: Fn(TenantId) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    let gate = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let deadline = Instant::now() + options.timeout;

    let (order, handles): (Vec<_>, Vec<_>) = tenants
        .into_iter()
        .map(|tenant| {
            let gate = gate.clone();
            let worker = worker.clone();
            let task = tokio::spawn({
                let tenant = tenant.clone();
                async move {
                    match timeout_at(deadline, async {
                        let _permit = match gate.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return Err("admission gate closed".to_string()),
                        };
                        worker(tenant).await
                    })
                    .await
                    {
                        Ok(Ok(())) => RolloutOutcome::Success,
                        Ok(Err(reason)) => RolloutOutcome::Failed(reason),
                        Err(_) => RolloutOutcome::TimedOut,
                    }
                }
            });
            (tenant, task)
        })
        .unzip();

    // Join barrier: every task reports exactly one result, panics included.
    order
        .into_iter()
        .zip(join_all(handles).await)
        .map(|(tenant, joined)| {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(%tenant, "rollout task panicked: {e}");
                    RolloutOutcome::Failed(format!("task panicked: {e}"))
                }
            };
            RolloutResult { tenant, outcome }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, outcome: RolloutOutcome) -> RolloutResult {
        RolloutResult {
            tenant: TenantId::new(id).unwrap(),
            outcome,
        }
    }

    #[test]
    fn report_partitions_successes_and_failures() {
        let report = RolloutReport {
            results: vec![
                result("ab", RolloutOutcome::Success),
                result("cd", RolloutOutcome::Failed("relation missing".into())),
                result("ef", RolloutOutcome::TimedOut),
            ],
        };
        assert!(!report.succeeded());
        assert_eq!(report.successes().count(), 1);
        assert_eq!(report.failures().count(), 2);
    }

    #[test]
    fn empty_report_is_success() {
        let report = RolloutReport::default();
        assert!(report.succeeded());
        assert!(report.is_empty());
    }
}
