use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Naming convention for tenant databases: `oilgas_<tenant_id>`.
pub const TENANT_DB_PREFIX: &str = "oilgas_";

/// Tenant identifier syntax violation. Raised before any database contact.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid tenant identifier {id:?}: {reason}")]
pub struct InvalidIdentifier {
    pub id: String,
    pub reason: &'static str,
}

/// Validated tenant identifier.
///
/// The identifier is interpolated into `CREATE DATABASE` / `DROP DATABASE`
/// statements via [`TenantId::database_name`], so this newtype is the only
/// gate against SQL-identifier injection. Construction always validates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Validate a candidate identifier: 2-20 chars, lowercase ASCII
    /// letters, digits and underscores only.
    pub fn new(raw: &str) -> Result<Self, InvalidIdentifier> {
        if raw.len() < 2 {
            return Err(InvalidIdentifier {
                id: raw.to_string(),
                reason: "must be at least 2 characters",
            });
        }
        if raw.len() > 20 {
            return Err(InvalidIdentifier {
                id: raw.to_string(),
                reason: "must be at most 20 characters",
            });
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(InvalidIdentifier {
                id: raw.to_string(),
                reason: "only lowercase letters, digits and underscores are allowed",
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Physical database name for this tenant.
    pub fn database_name(&self) -> String {
        format!("{}{}", TENANT_DB_PREFIX, self.0)
    }

    /// Recover a tenant id from a catalog database name. Returns `None` for
    /// databases outside the naming convention (or with an invalid suffix).
    pub fn from_database_name(datname: &str) -> Option<Self> {
        let suffix = datname.strip_prefix(TENANT_DB_PREFIX)?;
        Self::new(suffix).ok()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_identifiers() {
        for id in ["ab", "tenant_1", "longbeach", "a2", "x".repeat(20).as_str()] {
            assert!(TenantId::new(id).is_ok(), "expected {id:?} to be accepted");
        }
    }

    #[test]
    fn rejects_invalid_identifiers() {
        for id in ["a", "", "Tenant1", "bad-id", "x".repeat(21).as_str(), "sp ace", "semi;colon"] {
            assert!(TenantId::new(id).is_err(), "expected {id:?} to be rejected");
        }
    }

    #[test]
    fn derives_database_name() {
        let id = TenantId::new("longbeach").unwrap();
        assert_eq!(id.database_name(), "oilgas_longbeach");
    }

    #[test]
    fn round_trips_from_database_name() {
        assert_eq!(
            TenantId::from_database_name("oilgas_tenant_1"),
            Some(TenantId::new("tenant_1").unwrap())
        );
        assert_eq!(TenantId::from_database_name("postgres"), None);
        assert_eq!(TenantId::from_database_name("oilgas_"), None);
        // Suffix that fails validation is not a tenant either
        assert_eq!(TenantId::from_database_name("oilgas_Bad-Name"), None);
    }
}
