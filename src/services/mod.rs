pub mod consistency_service;
pub mod rollout_service;
pub mod tenant_service;

pub use consistency_service::{ConsistencyReport, ConsistencyService, SchemaVersionSnapshot};
pub use rollout_service::{RolloutOptions, RolloutOutcome, RolloutReport, RolloutResult, RolloutService};
pub use tenant_service::{TenantService, TenantStatus, TenantSummary};
