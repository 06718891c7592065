//! Authorization seam.
//!
//! Authentication/authorization is owned by the surrounding application;
//! the engine only needs a yes/no answer before touching a project or an
//! environment. [`AllowAll`] is the stand-in used by the daemon and tests.

use crate::domain::UserId;
use crate::errors::Result;
use crate::storage::{EnvironmentRecord, ProjectRecord};
use async_trait::async_trait;

/// Access decisions consumed by the engine
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Err(Forbidden) when the actor may not operate on the project
    async fn authorize_project_access(&self, actor: &UserId, project: &ProjectRecord)
        -> Result<()>;

    /// Err(Forbidden) when the actor may not read the environment
    async fn authorize_environment_access(
        &self,
        actor: &UserId,
        environment: &EnvironmentRecord,
    ) -> Result<()>;
}

/// Permits everything. For deployments where authorization happens at the
/// API gateway, and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize_project_access(
        &self,
        _actor: &UserId,
        _project: &ProjectRecord,
    ) -> Result<()> {
        Ok(())
    }

    async fn authorize_environment_access(
        &self,
        _actor: &UserId,
        _environment: &EnvironmentRecord,
    ) -> Result<()> {
        Ok(())
    }
}
