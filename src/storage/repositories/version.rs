//! Version Store.
//!
//! Owns the per-(item, environment) append-only version history. Version
//! numbers are contiguous starting at 1 per environment; the highest number
//! is "current". Appends read the current maximum and insert max+1 inside
//! the caller's transaction, so sibling writes (parent row touch, rotation
//! re-arm) share the same serialization point and two concurrent updates to
//! the same pair can never allocate the same number.

use crate::domain::{EnvironmentId, ItemId, UserId};
use crate::errors::{Result, VaultlineError};
use crate::storage::DbPool;
use sqlx::{FromRow, Sqlite, Transaction};
use tracing::instrument;
use uuid::Uuid;

/// Database row structure for item versions
#[derive(Debug, Clone, FromRow)]
pub struct VersionRecord {
    pub id: String,
    pub item_id: String,
    pub environment_id: String,
    pub version: i64,
    pub value: String,
    pub created_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Listing order for version history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionOrder {
    Asc,
    #[default]
    Desc,
}

impl VersionOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            VersionOrder::Asc => "ASC",
            VersionOrder::Desc => "DESC",
        }
    }
}

/// Repository for version data access. The only writer of version rows.
#[derive(Debug, Clone)]
pub struct VersionRepository {
    pool: DbPool,
}

impl VersionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append the next version for (item, environment) inside `tx`.
    ///
    /// Computes next = max existing version + 1, defaulting to 1 when no
    /// versions exist.
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        item_id: &ItemId,
        environment_id: &EnvironmentId,
        value: &str,
        author: &UserId,
    ) -> Result<VersionRecord> {
        let current: (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(version), 0) FROM item_versions \
             WHERE item_id = $1 AND environment_id = $2",
        )
        .bind(item_id.as_str())
        .bind(environment_id.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to read current version for item '{}'", item_id),
        })?;

        let next = current.0 + 1;
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO item_versions (id, item_id, environment_id, version, value, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&id)
        .bind(item_id.as_str())
        .bind(environment_id.as_str())
        .bind(next)
        .bind(value)
        .bind(author.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to append version {} for item '{}'", next, item_id),
        })?;

        Ok(VersionRecord {
            id,
            item_id: item_id.as_str().to_string(),
            environment_id: environment_id.as_str().to_string(),
            version: next,
            value: value.to_string(),
            created_by: author.as_str().to_string(),
            created_at: now,
        })
    }

    /// Paginated version history for one (item, environment) pair
    #[instrument(skip(self), fields(item_id = %item_id, environment_id = %environment_id), name = "db_list_versions")]
    pub async fn list(
        &self,
        item_id: &ItemId,
        environment_id: &EnvironmentId,
        order: VersionOrder,
        page: u32,
        limit: u32,
    ) -> Result<Vec<VersionRecord>> {
        let limit = limit.clamp(1, 100) as i64;
        let offset = page as i64 * limit;

        let query = format!(
            "SELECT * FROM item_versions WHERE item_id = $1 AND environment_id = $2 \
             ORDER BY version {} LIMIT $3 OFFSET $4",
            order.as_sql()
        );

        sqlx::query_as::<_, VersionRecord>(&query)
            .bind(item_id.as_str())
            .bind(environment_id.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VaultlineError::Database {
                source: e,
                context: format!("Failed to list versions for item '{}'", item_id),
            })
    }

    /// Current maximum version for a pair inside `tx` (0 when none exist)
    pub async fn current_max(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        item_id: &ItemId,
        environment_id: &EnvironmentId,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(version), 0) FROM item_versions \
             WHERE item_id = $1 AND environment_id = $2",
        )
        .bind(item_id.as_str())
        .bind(environment_id.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to read current version for item '{}'", item_id),
        })?;
        Ok(row.0)
    }

    /// Roll back to `target_version`, deleting every newer version.
    ///
    /// Valid only when `1 <= target_version < current_max`. Returns the
    /// number of deleted versions and the record now current (the target).
    pub async fn rollback(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        item_id: &ItemId,
        environment_id: &EnvironmentId,
        target_version: i64,
    ) -> Result<(u64, VersionRecord)> {
        let max = self.current_max(tx, item_id, environment_id).await?;
        if max == 0 {
            return Err(VaultlineError::not_found(format!(
                "No versions found for item '{}' in environment '{}'",
                item_id, environment_id
            )));
        }
        if target_version < 1 || target_version >= max {
            return Err(VaultlineError::bad_request(
                "Invalid rollback target",
                format!(
                    "Rollback target must be between 1 and {} (current version is {})",
                    max - 1,
                    max
                ),
            ));
        }

        let deleted = sqlx::query(
            "DELETE FROM item_versions \
             WHERE item_id = $1 AND environment_id = $2 AND version > $3",
        )
        .bind(item_id.as_str())
        .bind(environment_id.as_str())
        .bind(target_version)
        .execute(&mut **tx)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to roll back item '{}'", item_id),
        })?
        .rows_affected();

        let current = sqlx::query_as::<_, VersionRecord>(
            "SELECT * FROM item_versions \
             WHERE item_id = $1 AND environment_id = $2 AND version = $3",
        )
        .bind(item_id.as_str())
        .bind(environment_id.as_str())
        .bind(target_version)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Rollback target missing for item '{}'", item_id),
        })?;

        Ok((deleted, current))
    }

    /// Latest version per environment for an item, for listing endpoints
    /// that show the "current" value without returning full history.
    #[instrument(skip(self), fields(item_id = %item_id), name = "db_latest_per_environment")]
    pub async fn latest_per_environment(
        &self,
        item_id: &ItemId,
    ) -> Result<Vec<(EnvironmentId, VersionRecord)>> {
        let rows = sqlx::query_as::<_, VersionRecord>(
            "SELECT v.* FROM item_versions v \
             JOIN (SELECT environment_id, MAX(version) AS max_version \
                   FROM item_versions WHERE item_id = $1 GROUP BY environment_id) latest \
             ON v.environment_id = latest.environment_id AND v.version = latest.max_version \
             WHERE v.item_id = $1 ORDER BY v.environment_id",
        )
        .bind(item_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to read latest versions for item '{}'", item_id),
        })?;

        Ok(rows
            .into_iter()
            .map(|record| (EnvironmentId::from_string(record.environment_id.clone()), record))
            .collect())
    }

    /// Environment ids that hold at least one version of the item.
    ///
    /// Used by delete to tell downstream cleanup which environments were
    /// affected, and by rotation to pick the environments to regenerate.
    #[instrument(skip(self), fields(item_id = %item_id), name = "db_environments_with_versions")]
    pub async fn environments_with_versions(&self, item_id: &ItemId) -> Result<Vec<EnvironmentId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT environment_id FROM item_versions WHERE item_id = $1 \
             ORDER BY environment_id",
        )
        .bind(item_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to list environments for item '{}'", item_id),
        })?;

        Ok(rows.into_iter().map(|(id,)| EnvironmentId::from_string(id)).collect())
    }
}
