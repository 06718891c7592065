//! Environment repository.
//!
//! Environments are the unit of partitioning for version histories and for
//! integration environment-mapping. The engine resolves slugs through this
//! repository; environment CRUD proper lives in the surrounding application.

use crate::domain::{EnvironmentId, ProjectId};
use crate::errors::{Result, VaultlineError};
use crate::storage::DbPool;
use sqlx::FromRow;
use tracing::instrument;

/// Database row structure for environments
#[derive(Debug, Clone, FromRow)]
pub struct EnvironmentRecord {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub slug: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl EnvironmentRecord {
    pub fn environment_id(&self) -> EnvironmentId {
        EnvironmentId::from_string(self.id.clone())
    }
}

/// Create environment request
#[derive(Debug, Clone)]
pub struct CreateEnvironmentRequest {
    pub project_id: ProjectId,
    pub name: String,
    pub slug: String,
}

/// Repository for environment data access
#[derive(Debug, Clone)]
pub struct EnvironmentRepository {
    pool: DbPool,
}

impl EnvironmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, request), fields(environment_slug = %request.slug), name = "db_create_environment")]
    pub async fn create(&self, request: CreateEnvironmentRequest) -> Result<EnvironmentRecord> {
        let id = EnvironmentId::new();
        let now = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO environments (id, project_id, name, slug, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id.as_str())
        .bind(request.project_id.as_str())
        .bind(&request.name)
        .bind(&request.slug)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to create environment '{}'", request.slug),
        })?;

        self.get_by_id(&id).await
    }

    #[instrument(skip(self), fields(environment_id = %id), name = "db_get_environment")]
    pub async fn get_by_id(&self, id: &EnvironmentId) -> Result<EnvironmentRecord> {
        sqlx::query_as::<_, EnvironmentRecord>("SELECT * FROM environments WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultlineError::Database {
                source: e,
                context: format!("Failed to get environment '{}'", id),
            })?
            .ok_or_else(|| VaultlineError::not_found(format!("Environment '{}' not found", id)))
    }

    /// Resolve an environment slug within a project
    #[instrument(skip(self), fields(project_id = %project_id), name = "db_get_environment_by_slug")]
    pub async fn get_by_slug(
        &self,
        project_id: &ProjectId,
        slug: &str,
    ) -> Result<EnvironmentRecord> {
        sqlx::query_as::<_, EnvironmentRecord>(
            "SELECT * FROM environments WHERE project_id = $1 AND slug = $2",
        )
        .bind(project_id.as_str())
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to get environment '{}'", slug),
        })?
        .ok_or_else(|| VaultlineError::not_found(format!("Environment '{}' not found", slug)))
    }

    #[instrument(skip(self), fields(project_id = %project_id), name = "db_list_environments")]
    pub async fn list_for_project(&self, project_id: &ProjectId) -> Result<Vec<EnvironmentRecord>> {
        sqlx::query_as::<_, EnvironmentRecord>(
            "SELECT * FROM environments WHERE project_id = $1 ORDER BY slug",
        )
        .bind(project_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to list environments for project '{}'", project_id),
        })
    }
}
