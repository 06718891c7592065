//! Integration Run Ledger.
//!
//! Records the start/finish/duration/status/log of every external-call
//! attempt, independent of any plugin-level retry behavior. Runs reach a
//! terminal status exactly once; the finish update is guarded on the row
//! still being RUNNING.

use crate::domain::{EventId, IntegrationId, RunId, RunStatus};
use crate::errors::{Result, VaultlineError};
use crate::storage::DbPool;
use sqlx::FromRow;
use std::time::Instant;
use tracing::instrument;

/// Database row structure for integration runs
#[derive(Debug, Clone, FromRow)]
pub struct IntegrationRunRecord {
    pub id: String,
    pub integration_id: String,
    pub event_id: String,
    pub title: String,
    pub status: String,
    pub duration_ms: Option<i64>,
    pub log: Option<String>,
    pub triggered_at: chrono::DateTime<chrono::Utc>,
}

/// Handle returned by [`IntegrationRunRepository::start`]; carries the wall
/// clock used to compute the run's duration at finish.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: RunId,
    started: Instant,
}

impl RunHandle {
    pub fn elapsed_ms(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }
}

/// Repository for integration run records. The only writer of run rows.
#[derive(Debug, Clone)]
pub struct IntegrationRunRepository {
    pool: DbPool,
}

impl IntegrationRunRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a RUNNING record timestamped now
    #[instrument(skip(self), fields(integration_id = %integration_id, title = %title), name = "db_start_run")]
    pub async fn start(
        &self,
        integration_id: &IntegrationId,
        event_id: &EventId,
        title: &str,
    ) -> Result<RunHandle> {
        let id = RunId::new();
        sqlx::query(
            "INSERT INTO integration_runs (id, integration_id, event_id, title, status, triggered_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id.as_str())
        .bind(integration_id.as_str())
        .bind(event_id.as_str())
        .bind(title)
        .bind(RunStatus::Running.as_str())
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to start integration run '{}'", title),
        })?;

        Ok(RunHandle { run_id: id, started: Instant::now() })
    }

    /// Set terminal fields exactly once. A second finish for the same run
    /// is a no-op (the status guard fails to match).
    #[instrument(skip(self, handle, log), fields(run_id = %handle.run_id, status = %status), name = "db_finish_run")]
    pub async fn finish(&self, handle: &RunHandle, status: RunStatus, log: &str) -> Result<()> {
        debug_assert!(status != RunStatus::Running, "finish requires a terminal status");
        let result = sqlx::query(
            "UPDATE integration_runs SET status = $1, duration_ms = $2, log = $3 \
             WHERE id = $4 AND status = $5",
        )
        .bind(status.as_str())
        .bind(handle.elapsed_ms())
        .bind(log)
        .bind(handle.run_id.as_str())
        .bind(RunStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to finish integration run '{}'", handle.run_id),
        })?;

        if result.rows_affected() == 0 {
            tracing::warn!(run_id = %handle.run_id, "Integration run already finished");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(integration_id = %integration_id), name = "db_list_runs")]
    pub async fn list_for_integration(
        &self,
        integration_id: &IntegrationId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<IntegrationRunRecord>> {
        let limit = limit.clamp(1, 100) as i64;
        let offset = page as i64 * limit;
        sqlx::query_as::<_, IntegrationRunRecord>(
            "SELECT * FROM integration_runs WHERE integration_id = $1 \
             ORDER BY triggered_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(integration_id.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to list runs for integration '{}'", integration_id),
        })
    }
}
