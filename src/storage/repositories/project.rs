//! Project repository.
//!
//! Project CRUD proper belongs to the surrounding web application; the
//! engine only needs the rows that carry the per-project key pair and the
//! store-private-key flag, plus a create path for provisioning and tests.

use crate::domain::{ProjectId, WorkspaceId};
use crate::errors::{Result, VaultlineError};
use crate::storage::DbPool;
use sqlx::FromRow;
use tracing::instrument;

/// Database row structure for projects
#[derive(Debug, Clone, FromRow)]
pub struct ProjectRecord {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub slug: String,
    pub public_key: String,
    pub private_key: Option<String>,
    pub store_private_key: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ProjectRecord {
    pub fn project_id(&self) -> ProjectId {
        ProjectId::from_string(self.id.clone())
    }
}

/// Create project request
#[derive(Debug, Clone)]
pub struct CreateProjectRequest {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub slug: String,
    pub public_key: String,
    /// Stored only when `store_private_key` is set
    pub private_key: Option<String>,
    pub store_private_key: bool,
}

/// Repository for project data access
#[derive(Debug, Clone)]
pub struct ProjectRepository {
    pool: DbPool,
}

impl ProjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, request), fields(project_slug = %request.slug), name = "db_create_project")]
    pub async fn create(&self, request: CreateProjectRequest) -> Result<ProjectRecord> {
        let id = ProjectId::new();
        let now = chrono::Utc::now();
        let private_key = if request.store_private_key { request.private_key } else { None };

        sqlx::query(
            "INSERT INTO projects (id, workspace_id, name, slug, public_key, private_key, store_private_key, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(id.as_str())
        .bind(request.workspace_id.as_str())
        .bind(&request.name)
        .bind(&request.slug)
        .bind(&request.public_key)
        .bind(&private_key)
        .bind(request.store_private_key)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to create project '{}'", request.slug),
        })?;

        tracing::info!(project_id = %id, project_slug = %request.slug, "Created project");
        self.get_by_id(&id).await
    }

    #[instrument(skip(self), fields(project_id = %id), name = "db_get_project")]
    pub async fn get_by_id(&self, id: &ProjectId) -> Result<ProjectRecord> {
        sqlx::query_as::<_, ProjectRecord>("SELECT * FROM projects WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultlineError::Database {
                source: e,
                context: format!("Failed to get project '{}'", id),
            })?
            .ok_or_else(|| VaultlineError::not_found(format!("Project '{}' not found", id)))
    }

    #[instrument(skip(self), name = "db_get_project_by_slug")]
    pub async fn get_by_slug(&self, slug: &str) -> Result<ProjectRecord> {
        sqlx::query_as::<_, ProjectRecord>("SELECT * FROM projects WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultlineError::Database {
                source: e,
                context: format!("Failed to get project '{}'", slug),
            })?
            .ok_or_else(|| VaultlineError::not_found(format!("Project '{}' not found", slug)))
    }
}
