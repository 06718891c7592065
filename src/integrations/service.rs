//! Integration service.
//!
//! Owns the integration lifecycle: the five-step configuration resolution
//! that gates every create/update, persistence, post-commit `init`, and the
//! fan-out of change events to subscribed integrations. Dispatch runs after
//! the engine's transaction has committed and never propagates failures back
//! to the triggering caller; failed delete-class cleanup is parked in the
//! integration's metadata for the reconciler.

use crate::domain::{EventType, IntegrationId, UserId, WorkspaceId};
use crate::errors::{Result, VaultlineError};
use crate::services::Authorizer;
use crate::storage::{
    AuditEvent, AuditLogRepository, EnvironmentRepository, IntegrationRecord,
    IntegrationRepository, IntegrationRunRecord, IntegrationRunRepository, ProjectRecord,
    ProjectRepository,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::factory::IntegrationFactory;
use super::plugin::{ChangeEvent, EventDispatcher};
use super::types::{EnvironmentSupport, IntegrationType};

/// Key under which failed cleanup actions are parked in metadata
pub(crate) const PENDING_CLEANUP_KEY: &str = "pendingCleanup";

#[derive(Debug, Clone)]
pub struct CreateIntegrationRequest {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub integration_type: IntegrationType,
    pub project_slug: Option<String>,
    /// Fallback when the project does not store its private key
    pub private_key: Option<String>,
    pub environment_slugs: Vec<String>,
    pub notify_on: Vec<EventType>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateIntegrationRequest {
    pub name: Option<String>,
    /// Shallow-merged over the stored metadata before validation
    pub metadata: Option<serde_json::Value>,
    pub notify_on: Option<Vec<EventType>>,
    /// Replaces the environment set wholesale when provided
    pub environment_slugs: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct IntegrationService {
    projects: ProjectRepository,
    environments: EnvironmentRepository,
    integrations: IntegrationRepository,
    runs: IntegrationRunRepository,
    audit: AuditLogRepository,
    factory: IntegrationFactory,
    authorizer: Arc<dyn Authorizer>,
}

impl IntegrationService {
    pub fn new(
        projects: ProjectRepository,
        environments: EnvironmentRepository,
        integrations: IntegrationRepository,
        runs: IntegrationRunRepository,
        audit: AuditLogRepository,
        factory: IntegrationFactory,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self { projects, environments, integrations, runs, audit, factory, authorizer }
    }

    /// Create an integration. All five resolution steps must pass before
    /// the row is written; `init` runs after the write and its failure
    /// propagates without deleting the already-committed row.
    #[instrument(skip(self, request), fields(integration_type = %request.integration_type, name = %request.name), name = "integration_create")]
    pub async fn create(
        &self,
        actor: &UserId,
        request: CreateIntegrationRequest,
    ) -> Result<IntegrationRecord> {
        let descriptor = request.integration_type.descriptor();

        // Step 1: resolve and authorize the target project
        let project = match &request.project_slug {
            Some(slug) => {
                let project = self.projects.get_by_slug(slug).await?;
                self.authorizer.authorize_project_access(actor, &project).await?;
                Some(project)
            }
            None => None,
        };
        if descriptor.project_required && project.is_none() {
            return Err(VaultlineError::bad_request(
                "Project required",
                format!("{} integrations must be scoped to a project", request.integration_type),
            ));
        }

        // Step 2: resolve the private key
        let private_key = if descriptor.private_key_required {
            let resolved = self.resolve_private_key(project.as_ref(), request.private_key.as_deref());
            match resolved {
                Some(key) => Some(key),
                None => {
                    return Err(VaultlineError::bad_request(
                        "Private key required",
                        format!(
                            "{} integrations need the project private key; the project does not store it and none was supplied",
                            request.integration_type
                        ),
                    ))
                }
            }
        } else {
            None
        };

        // Step 3: resolve and authorize environments
        let environment_ids = self
            .resolve_environments(actor, project.as_ref(), &request.environment_slugs)
            .await?;
        check_environment_support(
            request.integration_type,
            descriptor.environment_support,
            environment_ids.len(),
        )?;

        // Step 4: permitted events
        request.integration_type.validate_permitted_events(&request.notify_on)?;

        // Step 5: metadata shape, then the live external check
        request.integration_type.validate_metadata(&request.metadata, false)?;
        let plugin = self.factory.create_with_type(request.integration_type);
        plugin.validate_configuration(&request.metadata).await?;

        let record = self
            .integrations
            .create(crate::storage::CreateIntegrationRow {
                workspace_id: request.workspace_id.clone(),
                project_id: project.as_ref().map(|p| p.project_id()),
                integration_type: request.integration_type.as_str().to_string(),
                name: request.name.clone(),
                metadata: request.metadata,
                notify_on: request.notify_on,
                environment_ids,
            })
            .await?;

        let event = AuditEvent::user(
            request.workspace_id,
            "integration",
            record.id.as_str(),
            EventType::IntegrationAdded,
            actor.clone(),
            "Integration created",
            serde_json::json!({ "name": request.name, "type": request.integration_type.as_str() }),
        );
        let event_id = event.id.clone();
        if let Err(e) = self.audit.record(&event).await {
            warn!(error = %e, "Failed to record audit event");
        }

        // The row is committed; a failing init surfaces to the caller but
        // leaves the integration in place for manual retry
        plugin.init(&record, private_key.as_deref(), &event_id).await?;
        Ok(record)
    }

    /// Update an integration, re-running the resolution steps for whatever
    /// the caller is changing
    #[instrument(skip(self, request), fields(integration_id = %id), name = "integration_update")]
    pub async fn update(
        &self,
        actor: &UserId,
        id: &IntegrationId,
        request: UpdateIntegrationRequest,
    ) -> Result<IntegrationRecord> {
        let current = self.integrations.get_by_id(id).await?;
        let integration_type: IntegrationType = current
            .integration_type
            .parse()
            .map_err(|_| VaultlineError::internal("Integration type not found"))?;
        let descriptor = integration_type.descriptor();

        let project = match &current.project_id {
            Some(project_id) => {
                let project = self.projects.get_by_id(project_id).await?;
                self.authorizer.authorize_project_access(actor, &project).await?;
                Some(project)
            }
            None => None,
        };

        let environment_ids = match &request.environment_slugs {
            Some(slugs) => {
                let resolved = self.resolve_environments(actor, project.as_ref(), slugs).await?;
                check_environment_support(
                    integration_type,
                    descriptor.environment_support,
                    resolved.len(),
                )?;
                Some(resolved)
            }
            None => None,
        };

        if let Some(notify_on) = &request.notify_on {
            integration_type.validate_permitted_events(notify_on)?;
        }

        let metadata = match request.metadata {
            Some(partial) => {
                let merged = merge_metadata(&current.metadata, partial);
                integration_type.validate_metadata(&merged, true)?;
                let plugin = self.factory.create_with_type(integration_type);
                plugin.validate_configuration(&merged).await?;
                Some(merged)
            }
            None => None,
        };

        let record = self
            .integrations
            .update(
                id,
                crate::storage::UpdateIntegrationRow {
                    name: request.name,
                    metadata,
                    notify_on: request.notify_on,
                    environment_ids,
                },
            )
            .await?;

        let event = AuditEvent::user(
            record.workspace_id.clone(),
            "integration",
            record.id.as_str(),
            EventType::IntegrationUpdated,
            actor.clone(),
            "Integration updated",
            serde_json::json!({ "name": record.name }),
        );
        if let Err(e) = self.audit.record(&event).await {
            warn!(error = %e, "Failed to record audit event");
        }
        Ok(record)
    }

    pub async fn get(&self, actor: &UserId, id: &IntegrationId) -> Result<IntegrationRecord> {
        let record = self.integrations.get_by_id(id).await?;
        if let Some(project_id) = &record.project_id {
            let project = self.projects.get_by_id(project_id).await?;
            self.authorizer.authorize_project_access(actor, &project).await?;
        }
        Ok(record)
    }

    pub async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<IntegrationRecord>> {
        self.integrations.list_by_workspace(workspace_id, page, limit).await
    }

    pub async fn list_runs(
        &self,
        id: &IntegrationId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<IntegrationRunRecord>> {
        self.runs.list_for_integration(id, page, limit).await
    }

    /// Delete the integration row. External cleanup is best-effort: a
    /// failure is logged and the row still goes away, taking the
    /// credentials with it.
    #[instrument(skip(self), fields(integration_id = %id), name = "integration_delete")]
    pub async fn delete(&self, actor: &UserId, id: &IntegrationId) -> Result<()> {
        let record = self.get(actor, id).await?;

        match self.factory.create_from_persisted(&record) {
            Ok(plugin) => {
                if let Err(e) = plugin.cleanup(&record).await {
                    warn!(integration_id = %id, error = %e, "External cleanup failed; deleting anyway");
                }
            }
            Err(e) => warn!(integration_id = %id, error = %e, "Skipping external cleanup"),
        }

        self.integrations.delete(id).await?;

        let event = AuditEvent::user(
            record.workspace_id.clone(),
            "integration",
            id.as_str(),
            EventType::IntegrationDeleted,
            actor.clone(),
            "Integration deleted",
            serde_json::json!({ "name": record.name }),
        );
        if let Err(e) = self.audit.record(&event).await {
            warn!(error = %e, "Failed to record audit event");
        }
        Ok(())
    }

    /// Validate metadata shape and run the live external check without
    /// persisting anything
    #[instrument(skip(self, metadata), fields(integration_type = %integration_type), name = "integration_test")]
    pub async fn test_configuration(
        &self,
        integration_type: IntegrationType,
        metadata: &serde_json::Value,
        notify_on: &[EventType],
    ) -> Result<()> {
        integration_type.validate_permitted_events(notify_on)?;
        integration_type.validate_metadata(metadata, false)?;
        let plugin = self.factory.create_with_type(integration_type);
        plugin.validate_configuration(metadata).await
    }

    /// Fan one change event out to every subscribed integration. Failures
    /// are logged and, for delete-class events, parked in the integration's
    /// metadata so the reconciler can retry the cleanup.
    #[instrument(skip(self, event), fields(event_type = %event.event_type), name = "integration_dispatch")]
    pub async fn dispatch_event(&self, event: &ChangeEvent) {
        let subscribed = match self
            .integrations
            .list_subscribed(event.event_type, &event.workspace_id, event.project_id.as_ref())
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to load subscribed integrations");
                return;
            }
        };

        for record in subscribed {
            let plugin = match self.factory.create_from_persisted(&record) {
                Ok(plugin) => plugin,
                Err(e) => {
                    warn!(integration_id = %record.id, error = %e, "Skipping integration");
                    continue;
                }
            };
            if let Err(e) = plugin.emit_event(&record, event).await {
                warn!(
                    integration_id = %record.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Integration event delivery failed"
                );
                if event.event_type.is_deletion() {
                    self.park_pending_cleanup(&record, event).await;
                }
            }
        }
    }

    /// Append the failed cleanup to the integration's `pendingCleanup` list
    /// so the reconciler retries it. Uses the optimistic metadata guard; a
    /// concurrent writer means the list was just touched, so losing the
    /// race is logged rather than retried here.
    async fn park_pending_cleanup(&self, record: &IntegrationRecord, event: &ChangeEvent) {
        let mut metadata = record.metadata.clone();
        let pending = metadata
            .as_object_mut()
            .map(|map| {
                map.entry(PENDING_CLEANUP_KEY)
                    .or_insert_with(|| serde_json::Value::Array(vec![]))
            })
            .and_then(|value| value.as_array_mut());
        let Some(pending) = pending else {
            warn!(integration_id = %record.id, "Integration metadata is not an object");
            return;
        };

        for entry in event.entries_for(record) {
            pending.push(serde_json::json!({
                "environmentId": entry.environment_id.as_str(),
                "action": event.event_type.as_str(),
                "name": event.item_name,
            }));
        }

        match self
            .integrations
            .update_metadata_guarded(&record.id, record.updated_at, &metadata)
            .await
        {
            Ok(true) => {
                info!(integration_id = %record.id, "Parked failed cleanup for reconciliation")
            }
            Ok(false) => {
                warn!(integration_id = %record.id, "Metadata moved while parking cleanup")
            }
            Err(e) => warn!(integration_id = %record.id, error = %e, "Failed to park cleanup"),
        }
    }

    fn resolve_private_key(
        &self,
        project: Option<&ProjectRecord>,
        supplied: Option<&str>,
    ) -> Option<String> {
        if let Some(project) = project {
            if project.store_private_key {
                if let Some(key) = &project.private_key {
                    return Some(key.clone());
                }
            }
        }
        supplied.map(str::to_string)
    }

    async fn resolve_environments(
        &self,
        actor: &UserId,
        project: Option<&ProjectRecord>,
        slugs: &[String],
    ) -> Result<Vec<crate::domain::EnvironmentId>> {
        if slugs.is_empty() {
            return Ok(vec![]);
        }
        let Some(project) = project else {
            return Err(VaultlineError::bad_request(
                "Environments cannot be resolved",
                "Environments were supplied without a resolvable project",
            ));
        };
        let mut resolved = Vec::with_capacity(slugs.len());
        for slug in slugs {
            let environment = self.environments.get_by_slug(&project.project_id(), slug).await?;
            self.authorizer.authorize_environment_access(actor, &environment).await?;
            resolved.push(environment.environment_id());
        }
        Ok(resolved)
    }
}

impl std::fmt::Debug for IntegrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationService").finish()
    }
}

/// Spawns dispatch in the background so the engine's caller never waits on
/// external systems
pub struct IntegrationDispatcher {
    service: Arc<IntegrationService>,
}

impl IntegrationDispatcher {
    pub fn new(service: Arc<IntegrationService>) -> Self {
        Self { service }
    }
}

impl EventDispatcher for IntegrationDispatcher {
    fn dispatch(&self, event: ChangeEvent) {
        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            service.dispatch_event(&event).await;
        });
    }
}

fn check_environment_support(
    integration_type: IntegrationType,
    support: EnvironmentSupport,
    count: usize,
) -> Result<()> {
    match support {
        EnvironmentSupport::None if count > 0 => Err(VaultlineError::bad_request(
            "Environments not supported",
            format!("{} integrations do not map environments", integration_type),
        )),
        EnvironmentSupport::Single if count != 1 => Err(VaultlineError::bad_request(
            "Exactly one environment required",
            format!("{} integrations map exactly one environment", integration_type),
        )),
        EnvironmentSupport::AtLeastOne if count == 0 => Err(VaultlineError::bad_request(
            "At least one environment required",
            format!("{} integrations need at least one mapped environment", integration_type),
        )),
        _ => Ok(()),
    }
}

/// Shallow merge of a partial metadata object over the stored one
fn merge_metadata(current: &serde_json::Value, partial: serde_json::Value) -> serde_json::Value {
    match (current.as_object(), partial) {
        (Some(base), serde_json::Value::Object(overrides)) => {
            let mut merged = base.clone();
            for (key, value) in overrides {
                merged.insert(key, value);
            }
            serde_json::Value::Object(merged)
        }
        (_, partial) => partial,
    }
}
