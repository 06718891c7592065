//! Audit log repository.
//!
//! The engine is a producer only: audit events are persisted fire-and-forget
//! and failures are logged rather than surfaced into the caller's result.

use crate::domain::{AuditSource, EventId, EventType, UserId, WorkspaceId};
use crate::errors::{Result, VaultlineError};
use crate::storage::DbPool;
use tracing::instrument;

/// Audit event descriptor
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub id: EventId,
    pub workspace_id: WorkspaceId,
    pub entity_type: String,
    pub entity_id: String,
    pub event_type: EventType,
    pub source: AuditSource,
    pub actor: Option<UserId>,
    pub title: String,
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    /// A user-triggered event
    pub fn user(
        workspace_id: WorkspaceId,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        actor: UserId,
        title: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            workspace_id,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            event_type,
            source: AuditSource::User,
            actor: Some(actor),
            title: title.into(),
            metadata,
        }
    }

    /// A system-triggered event (rotation sweep, reconciler)
    pub fn system(
        workspace_id: WorkspaceId,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        title: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            workspace_id,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            event_type,
            source: AuditSource::System,
            actor: None,
            title: title.into(),
            metadata,
        }
    }
}

/// Repository for audit log writes
#[derive(Debug, Clone)]
pub struct AuditLogRepository {
    pool: DbPool,
}

impl AuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type, entity_id = %event.entity_id), name = "db_record_audit_event")]
    pub async fn record(&self, event: &AuditEvent) -> Result<()> {
        let metadata_json = serde_json::to_string(&event.metadata)?;
        sqlx::query(
            "INSERT INTO audit_log (id, workspace_id, entity_type, entity_id, event_type, source, actor_id, title, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(event.id.as_str())
        .bind(event.workspace_id.as_str())
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(event.event_type.as_str())
        .bind(event.source.as_str())
        .bind(event.actor.as_ref().map(|a| a.as_str().to_string()))
        .bind(&event.title)
        .bind(&metadata_json)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| VaultlineError::Database {
            source: e,
            context: format!("Failed to record audit event '{}'", event.title),
        })?;
        Ok(())
    }
}
