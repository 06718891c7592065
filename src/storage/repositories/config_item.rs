//! Config item repository: secrets and variables.
//!
//! Both kinds share one table distinguished by a `kind` column, so the
//! UNIQUE(project_id, name) index enforces the cross-kind name-collision
//! rule without extra queries.

use crate::domain::{ItemId, ItemKind, ProjectId, UserId};
use crate::errors::{Result, VaultlineError};
use crate::storage::DbPool;
use sqlx::{FromRow, Sqlite, Transaction};
use tracing::instrument;

/// Database row structure for config items
#[derive(Debug, Clone, FromRow)]
pub struct ItemRecord {
    pub id: String,
    pub project_id: String,
    pub kind: String,
    pub name: String,
    pub slug: String,
    pub note: Option<String>,
    pub rotate_after_hours: Option<i64>,
    pub next_rotation_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_edited_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ItemRecord {
    pub fn item_id(&self) -> ItemId {
        ItemId::from_string(self.id.clone())
    }

    pub fn project_id(&self) -> ProjectId {
        ProjectId::from_string(self.project_id.clone())
    }

    pub fn item_kind(&self) -> Result<ItemKind> {
        self.kind
            .parse()
            .map_err(|_| VaultlineError::internal(format!("Unknown item kind: {}", self.kind)))
    }
}

/// Insert payload for a new config item (written inside the engine's
/// transaction alongside the first versions)
#[derive(Debug, Clone)]
pub struct CreateItemRow {
    pub id: ItemId,
    pub project_id: ProjectId,
    pub kind: ItemKind,
    pub name: String,
    pub slug: String,
    pub note: Option<String>,
    pub rotate_after_hours: Option<i64>,
    pub next_rotation_at: Option<chrono::DateTime<chrono::Utc>>,
    pub author: UserId,
}

/// Repository for config item data access
#[derive(Debug, Clone)]
pub struct ConfigItemRepository {
    pool: DbPool,
}

impl ConfigItemRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new item row inside `tx`
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        row: &CreateItemRow,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO config_items (id, project_id, kind, name, slug, note, rotate_after_hours, next_rotation_at, last_edited_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(row.id.as_str())
        .bind(row.project_id.as_str())
        .bind(row.kind.as_str())
        .bind(&row.name)
        .bind(&row.slug)
        .bind(&row.note)
        .bind(row.rotate_after_hours)
        .bind(row.next_rotation_at)
        .bind(row.author.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            // Concurrent creates can slip past the service's name check and
            // land on the UNIQUE(project_id, name) index instead
            if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                VaultlineError::conflict(
                    format!(
                        "{} '{}' already exists in this project",
                        row.kind.label(),
                        row.name
                    ),
                    "config_item",
                )
            } else {
                VaultlineError::Database {
                    source: e,
                    context: format!("Failed to create item '{}'", row.name),
                }
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(item_id = %id), name = "db_get_item")]
    pub async fn get_by_id(&self, id: &ItemId) -> Result<ItemRecord> {
        sqlx::query_as::<_, ItemRecord>("SELECT * FROM config_items WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultlineError::Database {
                source: e,
                context: format!("Failed to get item '{}'", id),
            })?
            .ok_or_else(|| VaultlineError::not_found(format!("Item '{}' not found", id)))
    }

    /// Find an item by name within a project regardless of kind.
    /// Used for the cross-kind uniqueness check before insert.
    #[instrument(skip(self), fields(project_id = %project_id), name = "db_find_item_by_name")]
    pub async fn find_by_name(
        &self,
        project_id: &ProjectId,
        name: &str,
    ) -> Result<Option<ItemRecord>> {
        sqlx::query_as::<_, ItemRecord>(
            "SELECT * FROM config_items WHERE project_id = $1 AND name = $2",
        )
        .bind(project_id.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to look up item '{}'", name),
        })
    }

    /// Update name/note and the editor reference inside `tx`.
    /// Metadata changes never create versions.
    pub async fn update_metadata(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: &ItemId,
        name: Option<&str>,
        note: Option<&str>,
        editor: &UserId,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query(
            "UPDATE config_items SET \
             name = COALESCE($1, name), \
             note = COALESCE($2, note), \
             last_edited_by = $3, updated_at = $4 \
             WHERE id = $5",
        )
        .bind(name)
        .bind(note)
        .bind(editor.as_str())
        .bind(now)
        .bind(id.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to update item '{}'", id),
        })?;
        Ok(())
    }

    /// Touch the parent row inside `tx` so version appends and the item
    /// share one serialization point.
    pub async fn touch(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: &ItemId,
        editor: &UserId,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query("UPDATE config_items SET last_edited_by = $1, updated_at = $2 WHERE id = $3")
            .bind(editor.as_str())
            .bind(now)
            .bind(id.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| VaultlineError::Database {
                source: e,
                context: format!("Failed to touch item '{}'", id),
            })?;
        Ok(())
    }

    /// Re-arm the rotation deadline inside `tx`
    pub async fn rearm_rotation(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: &ItemId,
        next_rotation_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE config_items SET next_rotation_at = $1, updated_at = $2 WHERE id = $3")
            .bind(next_rotation_at)
            .bind(chrono::Utc::now())
            .bind(id.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| VaultlineError::Database {
                source: e,
                context: format!("Failed to re-arm rotation for item '{}'", id),
            })?;
        Ok(())
    }

    /// Delete an item; versions cascade
    #[instrument(skip(self), fields(item_id = %id), name = "db_delete_item")]
    pub async fn delete(&self, id: &ItemId) -> Result<()> {
        let result = sqlx::query("DELETE FROM config_items WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| VaultlineError::Database {
                source: e,
                context: format!("Failed to delete item '{}'", id),
            })?;

        if result.rows_affected() == 0 {
            return Err(VaultlineError::not_found(format!("Item '{}' not found", id)));
        }
        tracing::info!(item_id = %id, "Deleted config item");
        Ok(())
    }

    /// Paginated listing for a project, optionally filtered by kind and a
    /// case-insensitive name search.
    #[instrument(skip(self), fields(project_id = %project_id), name = "db_list_items")]
    pub async fn list_for_project(
        &self,
        project_id: &ProjectId,
        kind: Option<ItemKind>,
        search: Option<&str>,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ItemRecord>> {
        let limit = limit.clamp(1, 100) as i64;
        let offset = page as i64 * limit;
        let pattern = search.map(|s| format!("%{}%", s.to_lowercase()));

        sqlx::query_as::<_, ItemRecord>(
            "SELECT * FROM config_items WHERE project_id = $1 \
             AND ($2 IS NULL OR kind = $2) \
             AND ($3 IS NULL OR LOWER(name) LIKE $3) \
             ORDER BY name LIMIT $4 OFFSET $5",
        )
        .bind(project_id.as_str())
        .bind(kind.map(|k| k.as_str()))
        .bind(pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to list items for project '{}'", project_id),
        })
    }

    /// Items whose rotation deadline has passed as of `now`
    #[instrument(skip(self), name = "db_list_rotation_due")]
    pub async fn list_rotation_due(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<ItemRecord>> {
        sqlx::query_as::<_, ItemRecord>(
            "SELECT * FROM config_items \
             WHERE kind = 'secret' AND rotate_after_hours IS NOT NULL \
             AND next_rotation_at IS NOT NULL AND next_rotation_at <= $1 \
             ORDER BY next_rotation_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: "Failed to list rotation-due items".to_string(),
        })
    }
}
