//! Integration plugin contract.
//!
//! A plugin translates internal change events into external API calls. Every
//! plugin is stateless: its credentials arrive with the persisted integration
//! record on each call, so no SDK client or token survives across requests.
//! All external calls funnel through [`record_run`] so each attempt lands in
//! the run ledger with a terminal status even on error paths.

use crate::domain::{EnvironmentId, EventId, EventType, IntegrationId, ProjectId, RunStatus, WorkspaceId};
use crate::errors::Result;
use crate::storage::{IntegrationRecord, IntegrationRunRepository};
use async_trait::async_trait;
use std::future::Future;
use tracing::warn;

use super::types::IntegrationType;

/// One changed (environment, value) pair carried by a change event
#[derive(Debug, Clone)]
pub struct EventEntry {
    pub environment_id: EnvironmentId,
    pub value: String,
    /// Value is still encrypted against the project key; sync-class plugins
    /// must decrypt before forwarding or abort the attempt
    pub is_ciphertext: bool,
}

/// Internal change event fanned out to subscribed integrations after the
/// originating transaction has committed
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub event_id: EventId,
    pub event_type: EventType,
    pub workspace_id: WorkspaceId,
    pub project_id: Option<ProjectId>,
    pub item_name: Option<String>,
    /// Set when the item was renamed in the same operation
    pub previous_name: Option<String>,
    pub entries: Vec<EventEntry>,
    pub title: String,
}

impl ChangeEvent {
    /// Entries restricted to the environments the integration maps.
    /// Integrations without environment mappings see every entry.
    pub fn entries_for(&self, integration: &IntegrationRecord) -> Vec<&EventEntry> {
        if integration.environment_ids.is_empty() {
            return self.entries.iter().collect();
        }
        self.entries
            .iter()
            .filter(|entry| integration.environment_ids.contains(&entry.environment_id))
            .collect()
    }
}

/// Seam between the engine and the integration layer. The engine calls
/// `dispatch` after its own transaction commits; implementations fan out in
/// the background and never surface errors to the engine.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: ChangeEvent);
}

/// Capability contract implemented per integration type
#[async_trait]
pub trait IntegrationPlugin: Send + Sync {
    fn integration_type(&self) -> IntegrationType;

    /// Live external check of the supplied metadata, e.g. a webhook GET or
    /// an auth probe. Fails `BadRequest` carrying the third party's own
    /// error text where available.
    async fn validate_configuration(&self, metadata: &serde_json::Value) -> Result<()>;

    /// One-time setup after the integration row is created, e.g. a welcome
    /// message or injecting the project private key into the external system
    async fn init(
        &self,
        integration: &IntegrationRecord,
        private_key: Option<&str>,
        event_id: &EventId,
    ) -> Result<()>;

    /// Forward one change event to the external system
    async fn emit_event(&self, integration: &IntegrationRecord, event: &ChangeEvent) -> Result<()>;

    /// Best-effort teardown before the integration row is deleted, e.g.
    /// removing state that `init` installed externally. Notification-level
    /// plugins have nothing to tear down.
    async fn cleanup(&self, _integration: &IntegrationRecord) -> Result<()> {
        Ok(())
    }
}

/// Run one external call inside a ledger run: opens a RUNNING record, then
/// finishes SUCCESS with the call's response text or FAILED with the error
/// text. Ledger bookkeeping failures are logged, never surfaced, so the
/// external outcome always wins.
pub(crate) async fn record_run<F>(
    runs: &IntegrationRunRepository,
    integration_id: &IntegrationId,
    event_id: &EventId,
    title: &str,
    op: F,
) -> Result<String>
where
    F: Future<Output = Result<String>>,
{
    let handle = runs.start(integration_id, event_id, title).await?;
    match op.await {
        Ok(log) => {
            if let Err(e) = runs.finish(&handle, RunStatus::Success, &log).await {
                warn!(run_id = %handle.run_id, error = %e, "Failed to finish integration run");
            }
            Ok(log)
        }
        Err(e) => {
            let text = e.to_string();
            if let Err(finish_err) = runs.finish(&handle, RunStatus::Failed, &text).await {
                warn!(run_id = %handle.run_id, error = %finish_err, "Failed to finish integration run");
            }
            Err(e)
        }
    }
}
