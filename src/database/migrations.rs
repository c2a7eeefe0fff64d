//! Ordered, idempotent schema migrations applied to every database.
//!
//! Every statement is guarded (`IF NOT EXISTS` / `ON CONFLICT DO NOTHING`)
//! so the whole set is safe to re-run; a half-migrated database left behind
//! by a failed provisioning attempt is completed by simply running the set
//! again. Applied versions are recorded in `migrations.schema_migrations`,
//! and a version already present in the tracker is never re-applied.

use std::collections::HashSet;

use sqlx::{PgConnection, Row};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration {version} ({name}) failed: {source}")]
    StepFailed {
        version: &'static str,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Which databases a step applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Central database and every tenant database.
    All,
    /// Administrative database only (the `auth` superset).
    CentralOnly,
}

/// The database a migration run is targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationTarget {
    Central,
    Tenant,
}

/// One ordered unit of DDL/DML, tagged with a version and a name.
pub struct MigrationStep {
    pub version: &'static str,
    pub name: &'static str,
    pub scope: Scope,
    pub statements: &'static [&'static str],
}

impl MigrationStep {
    pub fn applies_to(&self, target: MigrationTarget) -> bool {
        match self.scope {
            Scope::All => true,
            Scope::CentralOnly => target == MigrationTarget::Central,
        }
    }
}

/// Run before the tracker-guarded loop so the tracker itself exists.
const BOOTSTRAP: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS migrations",
    r"CREATE TABLE IF NOT EXISTS migrations.schema_migrations (
    version    TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
)",
];

pub const MIGRATIONS: &[MigrationStep] = &[
    MigrationStep {
        version: "001",
        name: "schema namespaces",
        scope: Scope::All,
        statements: &[
            "CREATE SCHEMA IF NOT EXISTS store",
            "CREATE SCHEMA IF NOT EXISTS migrations",
        ],
    },
    MigrationStep {
        version: "002",
        name: "schema version tracker",
        scope: Scope::All,
        statements: &[r"CREATE TABLE IF NOT EXISTS migrations.schema_migrations (
    version    TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"],
    },
    MigrationStep {
        version: "003",
        name: "reference tables",
        scope: Scope::All,
        statements: &[
            r"CREATE TABLE IF NOT EXISTS store.grade (
    id   SERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
)",
            r"CREATE TABLE IF NOT EXISTS store.size (
    id          SERIAL PRIMARY KEY,
    designation TEXT NOT NULL UNIQUE,
    od_inches   NUMERIC(6,3)
)",
        ],
    },
    MigrationStep {
        version: "004",
        name: "customer table",
        scope: Scope::All,
        statements: &[r"CREATE TABLE IF NOT EXISTS store.customer (
    id         BIGSERIAL PRIMARY KEY,
    name       TEXT NOT NULL UNIQUE,
    contact    TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    deleted_at TIMESTAMPTZ
)"],
    },
    MigrationStep {
        version: "005",
        name: "inventory and received tables",
        scope: Scope::All,
        statements: &[
            r"CREATE TABLE IF NOT EXISTS store.inventory (
    id          BIGSERIAL PRIMARY KEY,
    customer_id BIGINT NOT NULL REFERENCES store.customer (id),
    grade_id    INTEGER REFERENCES store.grade (id),
    size_id     INTEGER REFERENCES store.size (id),
    joints      INTEGER NOT NULL DEFAULT 0,
    rack        TEXT,
    notes       TEXT,
    imported_at TIMESTAMPTZ,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)",
            r"CREATE TABLE IF NOT EXISTS store.received (
    id            BIGSERIAL PRIMARY KEY,
    work_order    TEXT NOT NULL UNIQUE,
    customer_id   BIGINT NOT NULL REFERENCES store.customer (id),
    grade_id      INTEGER REFERENCES store.grade (id),
    size_id       INTEGER REFERENCES store.size (id),
    joints        INTEGER NOT NULL DEFAULT 0,
    date_received DATE,
    inspected_at  TIMESTAMPTZ,
    completed_at  TIMESTAMPTZ,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
)",
        ],
    },
    MigrationStep {
        version: "006",
        name: "performance indexes",
        scope: Scope::All,
        statements: &[
            "CREATE INDEX IF NOT EXISTS idx_inventory_customer ON store.inventory (customer_id)",
            "CREATE INDEX IF NOT EXISTS idx_received_customer ON store.received (customer_id)",
            "CREATE INDEX IF NOT EXISTS idx_received_work_order ON store.received (work_order)",
            r"CREATE INDEX IF NOT EXISTS idx_inventory_notes_fts ON store.inventory
    USING GIN (to_tsvector('english', coalesce(notes, '')))",
        ],
    },
    MigrationStep {
        version: "007",
        name: "auth schema (central only)",
        scope: Scope::CentralOnly,
        statements: &[
            "CREATE SCHEMA IF NOT EXISTS auth",
            r"CREATE TABLE IF NOT EXISTS auth.tenants (
    id           BIGSERIAL PRIMARY KEY,
    slug         TEXT NOT NULL UNIQUE,
    display_name TEXT,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
)",
            r"CREATE TABLE IF NOT EXISTS auth.users (
    id            BIGSERIAL PRIMARY KEY,
    tenant_id     BIGINT REFERENCES auth.tenants (id),
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
)",
            r"CREATE TABLE IF NOT EXISTS auth.sessions (
    id         BIGSERIAL PRIMARY KEY,
    user_id    BIGINT NOT NULL REFERENCES auth.users (id),
    token      TEXT NOT NULL UNIQUE,
    expires_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)",
        ],
    },
];

/// Reference rows shared by every tenant: API casing grades and common
/// outside-diameter sizes. Keyed on the natural key, so re-seeding is a no-op.
const SEEDS: &[&str] = &[
    r"INSERT INTO store.grade (name) VALUES
    ('H40'), ('J55'), ('K55'), ('N80'), ('L80'), ('C90'), ('T95'), ('P110'), ('Q125')
ON CONFLICT (name) DO NOTHING",
    r#"INSERT INTO store.size (designation, od_inches) VALUES
    ('2 3/8"', 2.375),
    ('2 7/8"', 2.875),
    ('3 1/2"', 3.500),
    ('4 1/2"', 4.500),
    ('5 1/2"', 5.500),
    ('7"', 7.000),
    ('9 5/8"', 9.625),
    ('13 3/8"', 13.375),
    ('20"', 20.000)
ON CONFLICT (designation) DO NOTHING"#,
];

/// Apply every pending migration step to one database, in order. Returns the
/// versions applied by this run (already-recorded versions are skipped).
pub async fn run_migrations(
    conn: &mut PgConnection,
    target: MigrationTarget,
) -> Result<Vec<&'static str>, MigrationError> {
    for statement in BOOTSTRAP {
        sqlx::query(statement).execute(&mut *conn).await?;
    }

    let recorded = applied_versions(conn).await?;
    let mut applied = Vec::new();

    for step in MIGRATIONS.iter().filter(|s| s.applies_to(target)) {
        if recorded.contains(step.version) {
            debug!(version = step.version, "migration already applied, skipping");
            continue;
        }

        for statement in step.statements {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(|source| MigrationError::StepFailed {
                    version: step.version,
                    name: step.name,
                    source,
                })?;
        }
        record_version(conn, step).await?;
        info!(version = step.version, name = step.name, "applied migration");
        applied.push(step.version);
    }

    Ok(applied)
}

/// Insert reference seed rows. Safe to call on every create.
pub async fn seed_reference_data(conn: &mut PgConnection) -> Result<(), MigrationError> {
    for statement in SEEDS {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn record_version(
    conn: &mut PgConnection,
    step: &MigrationStep,
) -> Result<(), MigrationError> {
    sqlx::query(
        "INSERT INTO migrations.schema_migrations (version, name) VALUES ($1, $2)
         ON CONFLICT (version) DO NOTHING",
    )
    .bind(step.version)
    .bind(step.name)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn applied_versions(conn: &mut PgConnection) -> Result<HashSet<String>, MigrationError> {
    let rows = sqlx::query("SELECT version FROM migrations.schema_migrations")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(|row| row.get("version")).collect())
}

/// Most recently applied version for one database, or `None` when the
/// tracker is empty. The version tiebreak keeps same-timestamp batches stable.
pub async fn latest_version(conn: &mut PgConnection) -> Result<Option<String>, MigrationError> {
    let row = sqlx::query(
        "SELECT version FROM migrations.schema_migrations
         ORDER BY applied_at DESC, version DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|r| r.get("version")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_statement_is_idempotent() {
        let all = BOOTSTRAP
            .iter()
            .chain(MIGRATIONS.iter().flat_map(|s| s.statements.iter()))
            .chain(SEEDS.iter());
        for statement in all {
            assert!(
                statement.contains("IF NOT EXISTS") || statement.contains("ON CONFLICT"),
                "statement is not re-run safe: {statement}"
            );
        }
    }

    #[test]
    fn versions_are_unique_and_ordered() {
        let versions: Vec<_> = MIGRATIONS.iter().map(|s| s.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted, "versions must be unique and ascending");
    }

    #[test]
    fn auth_superset_is_central_only() {
        for step in MIGRATIONS {
            let mentions_auth = step.statements.iter().any(|s| s.contains("auth."))
                || step.statements.contains(&"CREATE SCHEMA IF NOT EXISTS auth");
            assert_eq!(
                mentions_auth,
                step.scope == Scope::CentralOnly,
                "auth DDL must be confined to central-only steps ({})",
                step.version
            );
        }
        let tenant_steps: Vec<_> = MIGRATIONS
            .iter()
            .filter(|s| s.applies_to(MigrationTarget::Tenant))
            .collect();
        assert!(tenant_steps.iter().all(|s| s.scope == Scope::All));
        assert!(tenant_steps.len() < MIGRATIONS.len());
    }
}
