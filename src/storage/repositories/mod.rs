//! Data access repositories.

mod audit_log;
mod config_item;
mod environment;
mod integration;
mod integration_run;
mod project;
mod version;

pub use audit_log::{AuditEvent, AuditLogRepository};
pub use config_item::{ConfigItemRepository, CreateItemRow, ItemRecord};
pub use environment::{CreateEnvironmentRequest, EnvironmentRecord, EnvironmentRepository};
pub use integration::{
    CreateIntegrationRow, IntegrationRecord, IntegrationRepository, UpdateIntegrationRow,
};
pub use integration_run::{IntegrationRunRecord, IntegrationRunRepository, RunHandle};
pub use project::{CreateProjectRequest, ProjectRecord, ProjectRepository};
pub use version::{VersionOrder, VersionRecord, VersionRepository};
