use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is not set (administrative connection string is required)")]
    MissingDatabaseUrl,
}

/// Process configuration, read from the environment once at startup and
/// passed by reference from there on.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Administrative connection string (points at the central database).
    pub database_url: String,
    pub rollout: RolloutConfig,
}

/// Tuning for bulk schema rollouts.
#[derive(Debug, Clone)]
pub struct RolloutConfig {
    /// Maximum number of tenant tasks in flight at once.
    pub concurrency: usize,
    /// Deadline for a whole rollout invocation; tenants still waiting or
    /// running at expiry are reported as timed out.
    pub timeout: Duration,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout: Duration::from_secs(300),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let mut rollout = RolloutConfig::default();
        if let Ok(v) = env::var("OILGAS_ROLLOUT_CONCURRENCY") {
            rollout.concurrency = v.parse().unwrap_or(rollout.concurrency).max(1);
        }
        if let Ok(v) = env::var("OILGAS_ROLLOUT_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                rollout.timeout = Duration::from_secs(secs);
            }
        }

        Ok(Self {
            database_url,
            rollout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rollout_config() {
        let rollout = RolloutConfig::default();
        assert_eq!(rollout.concurrency, 5);
        assert_eq!(rollout.timeout, Duration::from_secs(300));
    }
}
