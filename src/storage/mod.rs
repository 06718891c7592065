//! # Storage Layer
//!
//! Database pool management, embedded migrations and the repositories that
//! own row lifecycles. The version repository is the only writer of version
//! rows; the run repository is the only writer of integration runs.

pub mod pool;
pub mod repositories;

pub use pool::{create_pool, run_migrations, DbPool};
pub use repositories::{
    AuditEvent, AuditLogRepository, ConfigItemRepository, CreateEnvironmentRequest,
    CreateIntegrationRow, CreateItemRow, CreateProjectRequest, EnvironmentRecord,
    EnvironmentRepository, IntegrationRecord, IntegrationRepository, IntegrationRunRecord,
    IntegrationRunRepository, ItemRecord, ProjectRecord, ProjectRepository, RunHandle,
    UpdateIntegrationRow, VersionOrder, VersionRecord, VersionRepository,
};
