//! Secret/Variable Engine.
//!
//! Orchestrates create/update/rollback/delete/list and rotation for config
//! items: enforces name uniqueness and environment access, drives the
//! Version Store and the crypto provider, and emits change notifications,
//! audit events and integration dispatches after its own transaction has
//! committed. Notification and audit failures are logged, never propagated,
//! so a committed write always succeeds from the caller's view.

use crate::crypto;
use crate::domain::{
    EnvironmentId, ItemId, ItemKind, LifecycleStage, ProjectId, UserId, WorkspaceId,
};
use crate::errors::{Result, VaultlineError};
use crate::integrations::{ChangeEvent, EventDispatcher, EventEntry};
use crate::notify::{ChangeNotification, ChangeNotifier};
use crate::storage::{
    AuditEvent, AuditLogRepository, ConfigItemRepository, CreateItemRow, DbPool,
    EnvironmentRepository, ItemRecord, ProjectRecord, ProjectRepository, VersionOrder,
    VersionRecord, VersionRepository,
};
use futures::stream::{self, StreamExt};
use rand::RngCore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One (environment, value) entry supplied on create/update
#[derive(Debug, Clone)]
pub struct EntryValue {
    pub environment_slug: String,
    pub value: String,
}

/// Create request for a secret or variable
#[derive(Debug, Clone)]
pub struct CreateItemRequest {
    pub kind: ItemKind,
    pub name: String,
    pub slug: String,
    pub note: Option<String>,
    /// Rotation interval in hours; `None` means "never"
    pub rotate_after_hours: Option<i64>,
    /// Zero entries are allowed: the item then has zero versions
    pub entries: Vec<EntryValue>,
}

/// Update request. Name/note changes never create versions; each entry
/// appends exactly one new version in its environment.
#[derive(Debug, Clone, Default)]
pub struct UpdateItemRequest {
    pub name: Option<String>,
    pub note: Option<String>,
    pub entries: Vec<EntryValue>,
}

/// Listing request for a project
#[derive(Debug, Clone, Default)]
pub struct ListItemsRequest {
    pub kind: Option<ItemKind>,
    pub search: Option<String>,
    pub page: u32,
    pub limit: u32,
    /// Decrypt secret values; guarded by the project's key posture
    pub decrypt: bool,
}

/// Current value of an item in one environment
#[derive(Debug, Clone)]
pub struct EnvironmentValue {
    pub environment_id: EnvironmentId,
    pub version: i64,
    pub value: String,
}

/// An item collapsed to its latest version per environment
#[derive(Debug, Clone)]
pub struct ItemWithValues {
    pub item: ItemRecord,
    pub values: Vec<EnvironmentValue>,
}

/// Aggregate result of one rotation sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationSweep {
    pub rotated: usize,
    pub failed: usize,
}

/// The engine. Cheap to clone; all state lives behind the pool.
#[derive(Clone)]
pub struct ItemService {
    pool: DbPool,
    projects: ProjectRepository,
    environments: EnvironmentRepository,
    items: ConfigItemRepository,
    versions: VersionRepository,
    audit: AuditLogRepository,
    notifier: ChangeNotifier,
    authorizer: Arc<dyn crate::services::Authorizer>,
    dispatcher: Option<Arc<dyn EventDispatcher>>,
    rotation_concurrency: usize,
}

impl ItemService {
    pub fn new(
        pool: DbPool,
        notifier: ChangeNotifier,
        authorizer: Arc<dyn crate::services::Authorizer>,
    ) -> Self {
        Self {
            projects: ProjectRepository::new(pool.clone()),
            environments: EnvironmentRepository::new(pool.clone()),
            items: ConfigItemRepository::new(pool.clone()),
            versions: VersionRepository::new(pool.clone()),
            audit: AuditLogRepository::new(pool.clone()),
            pool,
            notifier,
            authorizer,
            dispatcher: None,
            rotation_concurrency: 8,
        }
    }

    /// Attach the integration dispatcher invoked after commits
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Bound the number of items rotated concurrently per sweep
    pub fn with_rotation_concurrency(mut self, concurrency: usize) -> Self {
        self.rotation_concurrency = concurrency.max(1);
        self
    }

    /// Create a secret or variable with one version per supplied entry.
    #[instrument(skip(self, request), fields(project_id = %project_id, item_name = %request.name), name = "item_create")]
    pub async fn create(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        request: CreateItemRequest,
    ) -> Result<ItemRecord> {
        let project = self.projects.get_by_id(project_id).await?;
        self.authorizer.authorize_project_access(actor, &project).await?;

        // A name must not collide across secrets and variables
        if self.items.find_by_name(project_id, &request.name).await?.is_some() {
            return Err(VaultlineError::conflict(
                format!(
                    "{} '{}' already exists in this project",
                    request.kind.label(),
                    request.name
                ),
                "config_item",
            ));
        }

        let resolved = self.resolve_entries(actor, &project, &request.entries).await?;

        let now = chrono::Utc::now();
        let row = CreateItemRow {
            id: ItemId::new(),
            project_id: project_id.clone(),
            kind: request.kind,
            name: request.name.clone(),
            slug: request.slug.clone(),
            note: request.note.clone(),
            rotate_after_hours: request.rotate_after_hours,
            next_rotation_at: request
                .rotate_after_hours
                .map(|hours| now + chrono::Duration::hours(hours)),
            author: actor.clone(),
        };

        let mut tx = self.pool.begin().await?;
        self.items.insert(&mut tx, &row).await?;
        let mut stored = Vec::with_capacity(resolved.len());
        for (environment_id, plaintext) in &resolved {
            let at_rest = self.value_at_rest(request.kind, &project, plaintext)?;
            self.versions.append(&mut tx, &row.id, environment_id, &at_rest, actor).await?;
            stored.push((environment_id.clone(), plaintext.clone(), at_rest));
        }
        tx.commit().await?;

        info!(item_id = %row.id, kind = %request.kind, versions = stored.len(), "Created config item");

        // Committed; everything below is best-effort side effects
        for (environment_id, plaintext, _) in &stored {
            self.notifier.publish(ChangeNotification {
                environment_id: environment_id.clone(),
                name: request.name.clone(),
                value: plaintext.clone(),
                is_plaintext: true,
            });
        }

        let event_type = request.kind.event(LifecycleStage::Added);
        let event_id = self
            .record_audit(AuditEvent::user(
                WorkspaceId::from_string(project.workspace_id.clone()),
                request.kind.as_str(),
                row.id.as_str(),
                event_type,
                actor.clone(),
                format!("{} added", request.kind.label()),
                serde_json::json!({ "name": request.name }),
            ))
            .await;

        self.dispatch(ChangeEvent {
            event_id,
            event_type,
            workspace_id: WorkspaceId::from_string(project.workspace_id.clone()),
            project_id: Some(project_id.clone()),
            item_name: Some(request.name.clone()),
            previous_name: None,
            entries: stored
                .iter()
                .map(|(environment_id, _, at_rest)| EventEntry {
                    environment_id: environment_id.clone(),
                    value: at_rest.clone(),
                    is_ciphertext: request.kind == ItemKind::Secret,
                })
                .collect(),
            title: format!("{} added", request.kind.label()),
        });

        self.items.get_by_id(&row.id).await
    }

    /// Update name/note and append one version per supplied entry.
    #[instrument(skip(self, request), fields(item_id = %item_id), name = "item_update")]
    pub async fn update(
        &self,
        actor: &UserId,
        item_id: &ItemId,
        request: UpdateItemRequest,
    ) -> Result<ItemRecord> {
        let item = self.items.get_by_id(item_id).await?;
        let kind = item.item_kind()?;
        let project = self.projects.get_by_id(&item.project_id()).await?;
        self.authorizer.authorize_project_access(actor, &project).await?;

        let renamed = match &request.name {
            Some(name) if *name != item.name => {
                if self.items.find_by_name(&item.project_id(), name).await?.is_some() {
                    return Err(VaultlineError::conflict(
                        format!("{} '{}' already exists in this project", kind.label(), name),
                        "config_item",
                    ));
                }
                true
            }
            _ => false,
        };

        let resolved = self.resolve_entries(actor, &project, &request.entries).await?;

        let mut tx = self.pool.begin().await?;
        self.items
            .update_metadata(&mut tx, item_id, request.name.as_deref(), request.note.as_deref(), actor)
            .await?;
        let mut stored = Vec::with_capacity(resolved.len());
        for (environment_id, plaintext) in &resolved {
            let at_rest = self.value_at_rest(kind, &project, plaintext)?;
            self.versions.append(&mut tx, item_id, environment_id, &at_rest, actor).await?;
            stored.push((environment_id.clone(), plaintext.clone(), at_rest));
        }
        tx.commit().await?;

        let current_name = request.name.clone().unwrap_or_else(|| item.name.clone());
        for (environment_id, plaintext, _) in &stored {
            self.notifier.publish(ChangeNotification {
                environment_id: environment_id.clone(),
                name: current_name.clone(),
                value: plaintext.clone(),
                is_plaintext: true,
            });
        }

        let event_type = kind.event(LifecycleStage::Updated);
        let event_id = self
            .record_audit(AuditEvent::user(
                WorkspaceId::from_string(project.workspace_id.clone()),
                kind.as_str(),
                item_id.as_str(),
                event_type,
                actor.clone(),
                format!("{} updated", kind.label()),
                serde_json::json!({ "name": current_name }),
            ))
            .await;

        self.dispatch(ChangeEvent {
            event_id,
            event_type,
            workspace_id: WorkspaceId::from_string(project.workspace_id.clone()),
            project_id: Some(item.project_id()),
            item_name: Some(current_name),
            previous_name: renamed.then(|| item.name.clone()),
            entries: stored
                .iter()
                .map(|(environment_id, _, at_rest)| EventEntry {
                    environment_id: environment_id.clone(),
                    value: at_rest.clone(),
                    is_ciphertext: kind == ItemKind::Secret,
                })
                .collect(),
            title: format!("{} updated", kind.label()),
        });

        self.items.get_by_id(item_id).await
    }

    /// Roll back one environment's history to `target_version` and
    /// republish the now-current value so live subscribers converge.
    /// Returns the number of discarded versions.
    #[instrument(skip(self), fields(item_id = %item_id, target_version), name = "item_rollback")]
    pub async fn rollback(
        &self,
        actor: &UserId,
        item_id: &ItemId,
        environment_slug: &str,
        target_version: i64,
    ) -> Result<u64> {
        let item = self.items.get_by_id(item_id).await?;
        let kind = item.item_kind()?;
        let project = self.projects.get_by_id(&item.project_id()).await?;
        self.authorizer.authorize_project_access(actor, &project).await?;
        let environment = self.environments.get_by_slug(&item.project_id(), environment_slug).await?;
        self.authorizer.authorize_environment_access(actor, &environment).await?;

        let environment_id = environment.environment_id();
        let mut tx = self.pool.begin().await?;
        let (deleted, current) =
            self.versions.rollback(&mut tx, item_id, &environment_id, target_version).await?;
        self.items.touch(&mut tx, item_id, actor).await?;
        tx.commit().await?;

        info!(
            item_id = %item_id,
            environment_id = %environment_id,
            target_version,
            deleted,
            "Rolled back config item"
        );

        // Converge subscribers to the rolled-back value: plaintext when we
        // can decrypt it, ciphertext otherwise.
        let (value, is_plaintext) = self.presentable_value(kind, &project, &current.value);
        self.notifier.publish(ChangeNotification {
            environment_id: environment_id.clone(),
            name: item.name.clone(),
            value,
            is_plaintext,
        });

        let event_type = kind.event(LifecycleStage::Updated);
        let event_id = self
            .record_audit(AuditEvent::user(
                WorkspaceId::from_string(project.workspace_id.clone()),
                kind.as_str(),
                item_id.as_str(),
                event_type,
                actor.clone(),
                format!("{} rolled back", kind.label()),
                serde_json::json!({
                    "name": item.name,
                    "environmentId": environment_id.as_str(),
                    "targetVersion": target_version,
                }),
            ))
            .await;

        self.dispatch(ChangeEvent {
            event_id,
            event_type,
            workspace_id: WorkspaceId::from_string(project.workspace_id.clone()),
            project_id: Some(item.project_id()),
            item_name: Some(item.name.clone()),
            previous_name: None,
            entries: vec![EventEntry {
                environment_id,
                value: current.value.clone(),
                is_ciphertext: kind == ItemKind::Secret,
            }],
            title: format!("{} rolled back", kind.label()),
        });

        Ok(deleted)
    }

    /// Delete an item and all its versions. The audit event lists every
    /// environment that held at least one version, as a cleanup hint for
    /// downstream consumers.
    #[instrument(skip(self), fields(item_id = %item_id), name = "item_delete")]
    pub async fn delete(&self, actor: &UserId, item_id: &ItemId) -> Result<()> {
        let item = self.items.get_by_id(item_id).await?;
        let kind = item.item_kind()?;
        let project = self.projects.get_by_id(&item.project_id()).await?;
        self.authorizer.authorize_project_access(actor, &project).await?;

        let affected = self.versions.environments_with_versions(item_id).await?;
        self.items.delete(item_id).await?;

        let event_type = kind.event(LifecycleStage::Deleted);
        let environment_ids: Vec<&str> = affected.iter().map(|e| e.as_str()).collect();
        let event_id = self
            .record_audit(AuditEvent::user(
                WorkspaceId::from_string(project.workspace_id.clone()),
                kind.as_str(),
                item_id.as_str(),
                event_type,
                actor.clone(),
                format!("{} deleted", kind.label()),
                serde_json::json!({ "name": item.name, "environmentIds": environment_ids }),
            ))
            .await;

        self.dispatch(ChangeEvent {
            event_id,
            event_type,
            workspace_id: WorkspaceId::from_string(project.workspace_id.clone()),
            project_id: Some(item.project_id()),
            item_name: Some(item.name.clone()),
            previous_name: None,
            entries: affected
                .into_iter()
                .map(|environment_id| EventEntry {
                    environment_id,
                    value: String::new(),
                    is_ciphertext: false,
                })
                .collect(),
            title: format!("{} deleted", kind.label()),
        });

        Ok(())
    }

    /// List items with their latest version per environment.
    #[instrument(skip(self, request), fields(project_id = %project_id), name = "item_list")]
    pub async fn list_for_project(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        request: ListItemsRequest,
    ) -> Result<Vec<ItemWithValues>> {
        let project = self.projects.get_by_id(project_id).await?;
        self.authorizer.authorize_project_access(actor, &project).await?;

        let private_key = if request.decrypt {
            Some(self.require_private_key(&project)?.to_string())
        } else {
            None
        };

        let items = self
            .items
            .list_for_project(
                project_id,
                request.kind,
                request.search.as_deref(),
                request.page,
                request.limit,
            )
            .await?;

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let kind = item.item_kind()?;
            let latest = self.versions.latest_per_environment(&item.item_id()).await?;
            let mut values = Vec::with_capacity(latest.len());
            for (environment_id, record) in latest {
                let value = match (&private_key, kind) {
                    (Some(key), ItemKind::Secret) => {
                        crypto::decrypt_asymmetric(key, &record.value)?
                    }
                    _ => record.value.clone(),
                };
                values.push(EnvironmentValue { environment_id, version: record.version, value });
            }
            out.push(ItemWithValues { item, values });
        }
        Ok(out)
    }

    /// Paginated version history for one environment.
    #[instrument(skip(self), fields(item_id = %item_id), name = "item_list_versions")]
    pub async fn list_versions(
        &self,
        actor: &UserId,
        item_id: &ItemId,
        environment_slug: &str,
        order: VersionOrder,
        page: u32,
        limit: u32,
    ) -> Result<Vec<VersionRecord>> {
        let item = self.items.get_by_id(item_id).await?;
        let project = self.projects.get_by_id(&item.project_id()).await?;
        self.authorizer.authorize_project_access(actor, &project).await?;
        let environment = self.environments.get_by_slug(&item.project_id(), environment_slug).await?;
        self.authorizer.authorize_environment_access(actor, &environment).await?;

        self.versions.list(item_id, &environment.environment_id(), order, page, limit).await
    }

    /// Rotate every secret whose deadline has passed as of `now`.
    ///
    /// Item rotations run concurrently (bounded) and independently: one
    /// item's failure is logged and counted, never aborts the sweep.
    /// Idempotent per sweep: re-arming pushes deadlines past `now`.
    #[instrument(skip(self), name = "rotation_sweep")]
    pub async fn rotate(&self, now: chrono::DateTime<chrono::Utc>) -> Result<RotationSweep> {
        let due = self.items.list_rotation_due(now).await?;
        if due.is_empty() {
            return Ok(RotationSweep::default());
        }

        let results: Vec<(ItemId, Result<()>)> = stream::iter(due)
            .map(|item| {
                let service = self.clone();
                async move {
                    let id = item.item_id();
                    let outcome = service.rotate_item(&item, now).await;
                    (id, outcome)
                }
            })
            .buffer_unordered(self.rotation_concurrency)
            .collect()
            .await;

        let mut sweep = RotationSweep::default();
        for (item_id, outcome) in results {
            match outcome {
                Ok(()) => sweep.rotated += 1,
                Err(e) => {
                    sweep.failed += 1;
                    warn!(item_id = %item_id, error = %e, "Secret rotation failed");
                }
            }
        }

        info!(rotated = sweep.rotated, failed = sweep.failed, "Rotation sweep complete");
        Ok(sweep)
    }

    /// Rotate one item: a fresh random value per environment that already
    /// has history, encrypted against the project public key directly.
    async fn rotate_item(
        &self,
        item: &ItemRecord,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let item_id = item.item_id();
        let kind = item.item_kind()?;
        let project = self.projects.get_by_id(&item.project_id()).await?;
        let hours = item.rotate_after_hours.ok_or_else(|| {
            VaultlineError::internal(format!("Item '{}' has no rotation interval", item_id))
        })?;

        let environments = self.versions.environments_with_versions(&item_id).await?;
        let system = UserId::from_string("system".to_string());

        let mut rotated = Vec::with_capacity(environments.len());
        let mut tx = self.pool.begin().await?;
        for environment_id in &environments {
            let mut raw = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut raw);
            let ciphertext = crypto::encrypt_asymmetric(&project.public_key, &hex::encode(raw))?;
            self.versions.append(&mut tx, &item_id, environment_id, &ciphertext, &system).await?;
            rotated.push((environment_id.clone(), ciphertext));
        }
        self.items.rearm_rotation(&mut tx, &item_id, now + chrono::Duration::hours(hours)).await?;
        tx.commit().await?;

        info!(item_id = %item_id, environments = rotated.len(), "Rotated secret");

        // Rotated values are stored pre-encrypted, so subscribers get ciphertext
        for (environment_id, ciphertext) in &rotated {
            self.notifier.publish(ChangeNotification {
                environment_id: environment_id.clone(),
                name: item.name.clone(),
                value: ciphertext.clone(),
                is_plaintext: false,
            });
        }

        let event_type = kind.event(LifecycleStage::Updated);
        let event_id = self
            .record_audit(AuditEvent::system(
                WorkspaceId::from_string(project.workspace_id.clone()),
                kind.as_str(),
                item_id.as_str(),
                event_type,
                format!("{} rotated", kind.label()),
                serde_json::json!({ "name": item.name }),
            ))
            .await;

        self.dispatch(ChangeEvent {
            event_id,
            event_type,
            workspace_id: WorkspaceId::from_string(project.workspace_id.clone()),
            project_id: Some(item.project_id()),
            item_name: Some(item.name.clone()),
            previous_name: None,
            entries: rotated
                .into_iter()
                .map(|(environment_id, ciphertext)| EventEntry {
                    environment_id,
                    value: ciphertext,
                    is_ciphertext: true,
                })
                .collect(),
            title: format!("{} rotated", kind.label()),
        });

        Ok(())
    }

    /// Resolve entry slugs to environment ids, authorizing each.
    async fn resolve_entries(
        &self,
        actor: &UserId,
        project: &ProjectRecord,
        entries: &[EntryValue],
    ) -> Result<Vec<(EnvironmentId, String)>> {
        let mut resolved = Vec::with_capacity(entries.len());
        for entry in entries {
            let environment =
                self.environments.get_by_slug(&project.project_id(), &entry.environment_slug).await?;
            self.authorizer.authorize_environment_access(actor, &environment).await?;
            resolved.push((environment.environment_id(), entry.value.clone()));
        }
        Ok(resolved)
    }

    /// At-rest form of a value: ciphertext for secrets, plain for variables
    fn value_at_rest(
        &self,
        kind: ItemKind,
        project: &ProjectRecord,
        plaintext: &str,
    ) -> Result<String> {
        match kind {
            ItemKind::Secret => crypto::encrypt_asymmetric(&project.public_key, plaintext),
            ItemKind::Variable => Ok(plaintext.to_string()),
        }
    }

    /// Best presentable form of a stored value for a notification
    fn presentable_value(
        &self,
        kind: ItemKind,
        project: &ProjectRecord,
        stored: &str,
    ) -> (String, bool) {
        if kind == ItemKind::Variable {
            return (stored.to_string(), true);
        }
        if project.store_private_key {
            if let Some(key) = &project.private_key {
                if let Ok(plaintext) = crypto::decrypt_asymmetric(key, stored) {
                    return (plaintext, true);
                }
            }
        }
        (stored.to_string(), false)
    }

    /// The decrypt=true guards for listing
    fn require_private_key<'a>(&self, project: &'a ProjectRecord) -> Result<&'a str> {
        if !project.store_private_key {
            return Err(VaultlineError::bad_request(
                "Cannot decrypt secret values",
                "Cannot decrypt secret values as the project does not store the private key",
            ));
        }
        match &project.private_key {
            Some(key) => Ok(key),
            // The row promises a key it does not have: data-integrity fault
            None => Err(VaultlineError::not_found(format!(
                "Project '{}' does not have a private key",
                project.slug
            ))),
        }
    }

    /// Persist the audit event; failures are logged only
    async fn record_audit(&self, event: AuditEvent) -> crate::domain::EventId {
        let event_id = event.id.clone();
        if let Err(e) = self.audit.record(&event).await {
            warn!(error = %e, title = %event.title, "Failed to record audit event");
        }
        event_id
    }

    /// Hand the event to the integration dispatcher, if one is attached
    fn dispatch(&self, event: ChangeEvent) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(event);
        }
    }
}

impl std::fmt::Debug for ItemService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemService").field("pool", &"[DbPool]").finish()
    }
}
