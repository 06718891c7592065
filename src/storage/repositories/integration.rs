//! Integration repository.
//!
//! Integration rows carry their type tag, a ServerCrypto-encrypted metadata
//! blob (type-specific credentials plus the optional `pendingCleanup` list),
//! the subscribed event set, and an environment association table. Metadata
//! is encrypted on write and decrypted on read so credentials never touch
//! disk in the clear.

use crate::crypto::ServerCrypto;
use crate::domain::{EnvironmentId, EventType, IntegrationId, ProjectId, WorkspaceId};
use crate::errors::{Result, VaultlineError};
use crate::storage::DbPool;
use sqlx::FromRow;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct IntegrationRow {
    id: String,
    workspace_id: String,
    project_id: Option<String>,
    integration_type: String,
    name: String,
    metadata_encrypted: String,
    notify_on: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

/// Integration data with decrypted metadata
#[derive(Debug, Clone)]
pub struct IntegrationRecord {
    pub id: IntegrationId,
    pub workspace_id: WorkspaceId,
    pub project_id: Option<ProjectId>,
    /// Raw persisted type tag; parsed by the factory so an unrecognized
    /// value surfaces as a defensive internal error there, not here
    pub integration_type: String,
    pub name: String,
    pub metadata: serde_json::Value,
    pub notify_on: Vec<EventType>,
    pub environment_ids: Vec<EnvironmentId>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Insert payload for a new integration
#[derive(Debug, Clone)]
pub struct CreateIntegrationRow {
    pub workspace_id: WorkspaceId,
    pub project_id: Option<ProjectId>,
    pub integration_type: String,
    pub name: String,
    pub metadata: serde_json::Value,
    pub notify_on: Vec<EventType>,
    pub environment_ids: Vec<EnvironmentId>,
}

/// Partial update payload. Environments are replaced wholesale when provided.
#[derive(Debug, Clone, Default)]
pub struct UpdateIntegrationRow {
    pub name: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub notify_on: Option<Vec<EventType>>,
    pub environment_ids: Option<Vec<EnvironmentId>>,
}

/// Repository for integration data access
#[derive(Clone)]
pub struct IntegrationRepository {
    pool: DbPool,
    crypto: ServerCrypto,
}

impl IntegrationRepository {
    pub fn new(pool: DbPool, crypto: ServerCrypto) -> Self {
        Self { pool, crypto }
    }

    #[instrument(skip(self, row), fields(integration_name = %row.name), name = "db_create_integration")]
    pub async fn create(&self, row: CreateIntegrationRow) -> Result<IntegrationRecord> {
        let id = IntegrationId::new();
        let now = chrono::Utc::now();
        let metadata_encrypted = self.crypto.encrypt(&row.metadata.to_string())?;
        let notify_on = serde_json::to_string(&row.notify_on)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO integrations (id, workspace_id, project_id, integration_type, name, metadata_encrypted, notify_on, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(id.as_str())
        .bind(row.workspace_id.as_str())
        .bind(row.project_id.as_ref().map(|p| p.as_str().to_string()))
        .bind(&row.integration_type)
        .bind(&row.name)
        .bind(&metadata_encrypted)
        .bind(&notify_on)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to create integration '{}'", row.name),
        })?;

        for environment_id in &row.environment_ids {
            sqlx::query(
                "INSERT INTO integration_environments (integration_id, environment_id) VALUES ($1, $2)",
            )
            .bind(id.as_str())
            .bind(environment_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| VaultlineError::Database {
                source: e,
                context: format!("Failed to attach environment to integration '{}'", id),
            })?;
        }
        tx.commit().await?;

        tracing::info!(
            integration_id = %id,
            integration_type = %row.integration_type,
            "Created integration"
        );
        self.get_by_id(&id).await
    }

    #[instrument(skip(self), fields(integration_id = %id), name = "db_get_integration")]
    pub async fn get_by_id(&self, id: &IntegrationId) -> Result<IntegrationRecord> {
        let row = sqlx::query_as::<_, IntegrationRow>("SELECT * FROM integrations WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultlineError::Database {
                source: e,
                context: format!("Failed to get integration '{}'", id),
            })?
            .ok_or_else(|| VaultlineError::not_found(format!("Integration '{}' not found", id)))?;

        self.decrypt_row(row).await
    }

    #[instrument(skip(self), fields(workspace_id = %workspace_id), name = "db_list_integrations")]
    pub async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<IntegrationRecord>> {
        let limit = limit.clamp(1, 100) as i64;
        let offset = page as i64 * limit;

        let rows = sqlx::query_as::<_, IntegrationRow>(
            "SELECT * FROM integrations WHERE workspace_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(workspace_id.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to list integrations for workspace '{}'", workspace_id),
        })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.decrypt_row(row).await?);
        }
        Ok(records)
    }

    /// All integrations, for the reconciler's sweep
    #[instrument(skip(self), name = "db_list_all_integrations")]
    pub async fn list_all(&self) -> Result<Vec<IntegrationRecord>> {
        let rows =
            sqlx::query_as::<_, IntegrationRow>("SELECT * FROM integrations ORDER BY created_at")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| VaultlineError::Database {
                    source: e,
                    context: "Failed to list integrations".to_string(),
                })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.decrypt_row(row).await?);
        }
        Ok(records)
    }

    /// Integrations in one workspace subscribed to `event_type`, optionally
    /// scoped to a project. Environment-mapping filters are applied by the
    /// plugins.
    #[instrument(skip(self), fields(event_type = %event_type), name = "db_list_subscribed")]
    pub async fn list_subscribed(
        &self,
        event_type: EventType,
        workspace_id: &WorkspaceId,
        project_id: Option<&ProjectId>,
    ) -> Result<Vec<IntegrationRecord>> {
        // notify_on holds a JSON array of quoted event names; the closed
        // vocabulary makes a quoted LIKE match exact.
        let pattern = format!("%\"{}\"%", event_type.as_str());
        let rows = sqlx::query_as::<_, IntegrationRow>(
            "SELECT * FROM integrations WHERE notify_on LIKE $1 \
             AND workspace_id = $2 \
             AND (project_id IS NULL OR $3 IS NULL OR project_id = $3) \
             ORDER BY created_at",
        )
        .bind(&pattern)
        .bind(workspace_id.as_str())
        .bind(project_id.map(|p| p.as_str().to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to list integrations for event '{}'", event_type),
        })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.decrypt_row(row).await?);
        }
        Ok(records)
    }

    #[instrument(skip(self, update), fields(integration_id = %id), name = "db_update_integration")]
    pub async fn update(
        &self,
        id: &IntegrationId,
        update: UpdateIntegrationRow,
    ) -> Result<IntegrationRecord> {
        let current = self.get_by_id(id).await?;
        let now = chrono::Utc::now();

        let name = update.name.unwrap_or(current.name);
        let metadata = update.metadata.unwrap_or(current.metadata);
        let notify_on = update.notify_on.unwrap_or(current.notify_on);
        let metadata_encrypted = self.crypto.encrypt(&metadata.to_string())?;
        let notify_on_json = serde_json::to_string(&notify_on)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE integrations SET name = $1, metadata_encrypted = $2, notify_on = $3, updated_at = $4 WHERE id = $5",
        )
        .bind(&name)
        .bind(&metadata_encrypted)
        .bind(&notify_on_json)
        .bind(now)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to update integration '{}'", id),
        })?;

        // Environments are replaced wholesale when provided
        if let Some(environment_ids) = update.environment_ids {
            sqlx::query("DELETE FROM integration_environments WHERE integration_id = $1")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| VaultlineError::Database {
                    source: e,
                    context: format!("Failed to detach environments from integration '{}'", id),
                })?;
            for environment_id in &environment_ids {
                sqlx::query(
                    "INSERT INTO integration_environments (integration_id, environment_id) VALUES ($1, $2)",
                )
                .bind(id.as_str())
                .bind(environment_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| VaultlineError::Database {
                    source: e,
                    context: format!("Failed to attach environment to integration '{}'", id),
                })?;
            }
        }
        tx.commit().await?;

        self.get_by_id(id).await
    }

    /// Re-encrypt and persist metadata only when the row has not moved
    /// since it was read. Returns false when the optimistic guard failed.
    #[instrument(skip(self, metadata), fields(integration_id = %id), name = "db_update_integration_metadata")]
    pub async fn update_metadata_guarded(
        &self,
        id: &IntegrationId,
        expected_updated_at: chrono::DateTime<chrono::Utc>,
        metadata: &serde_json::Value,
    ) -> Result<bool> {
        let metadata_encrypted = self.crypto.encrypt(&metadata.to_string())?;
        let result = sqlx::query(
            "UPDATE integrations SET metadata_encrypted = $1, updated_at = $2 \
             WHERE id = $3 AND updated_at = $4",
        )
        .bind(&metadata_encrypted)
        .bind(chrono::Utc::now())
        .bind(id.as_str())
        .bind(expected_updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to update metadata for integration '{}'", id),
        })?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove one environment association (environment-deletion cleanup)
    #[instrument(skip(self), fields(integration_id = %id, environment_id = %environment_id), name = "db_disconnect_environment")]
    pub async fn disconnect_environment(
        &self,
        id: &IntegrationId,
        environment_id: &EnvironmentId,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM integration_environments WHERE integration_id = $1 AND environment_id = $2",
        )
        .bind(id.as_str())
        .bind(environment_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to disconnect environment from integration '{}'", id),
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(integration_id = %id), name = "db_delete_integration")]
    pub async fn delete(&self, id: &IntegrationId) -> Result<()> {
        let result = sqlx::query("DELETE FROM integrations WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| VaultlineError::Database {
                source: e,
                context: format!("Failed to delete integration '{}'", id),
            })?;
        if result.rows_affected() == 0 {
            return Err(VaultlineError::not_found(format!("Integration '{}' not found", id)));
        }
        tracing::info!(integration_id = %id, "Deleted integration");
        Ok(())
    }

    async fn decrypt_row(&self, row: IntegrationRow) -> Result<IntegrationRecord> {
        let metadata_json = self.crypto.decrypt(&row.metadata_encrypted)?;
        let metadata: serde_json::Value = serde_json::from_str(&metadata_json)?;
        let notify_on: Vec<EventType> = serde_json::from_str(&row.notify_on)?;

        let environment_rows: Vec<(String,)> = sqlx::query_as(
            "SELECT environment_id FROM integration_environments WHERE integration_id = $1 \
             ORDER BY environment_id",
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to load environments for integration '{}'", row.id),
        })?;

        Ok(IntegrationRecord {
            id: IntegrationId::from_string(row.id),
            workspace_id: WorkspaceId::from_string(row.workspace_id),
            project_id: row.project_id.map(ProjectId::from_string),
            integration_type: row.integration_type,
            name: row.name,
            metadata,
            notify_on,
            environment_ids: environment_rows
                .into_iter()
                .map(|(id,)| EnvironmentId::from_string(id))
                .collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl std::fmt::Debug for IntegrationRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationRepository").field("pool", &"[DbPool]").finish()
    }
}
