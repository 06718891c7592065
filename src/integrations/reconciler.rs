//! Cleanup reconciler.
//!
//! Background retry loop for external cleanup that failed at
//! delete-dispatch time. Each pass scans every integration's metadata for a
//! `pendingCleanup` list, replays the recorded action through the plugin,
//! and removes entries that succeed. Persistence uses the optimistic
//! metadata guard: an entry cleared by a concurrent writer counts as
//! already resolved, not as an error.

use crate::domain::{EventId, EventType};
use crate::errors::Result;
use crate::storage::{IntegrationRecord, IntegrationRepository};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::factory::IntegrationFactory;
use super::plugin::{ChangeEvent, EventEntry};
use super::service::PENDING_CLEANUP_KEY;

#[derive(Debug, Deserialize)]
struct PendingCleanup {
    #[serde(rename = "environmentId")]
    environment_id: String,
    action: String,
    name: Option<String>,
}

pub struct Reconciler {
    integrations: IntegrationRepository,
    factory: IntegrationFactory,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl Reconciler {
    pub fn new(
        integrations: IntegrationRepository,
        factory: IntegrationFactory,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self { integrations, factory, interval, shutdown_rx }
    }

    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Reconciler started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_once().await,
                    changed = self.shutdown_rx.changed() => {
                        if changed.is_err() || *self.shutdown_rx.borrow() {
                            info!("Reconciler stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// One reconciliation pass; a failing integration never blocks the rest
    #[instrument(skip(self), name = "reconcile_pass")]
    pub async fn run_once(&self) {
        let records = match self.integrations.list_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to list integrations");
                return;
            }
        };

        for record in records {
            if let Err(e) = self.reconcile_integration(&record).await {
                warn!(integration_id = %record.id, error = %e, "Reconciliation failed");
            }
        }
    }

    async fn reconcile_integration(&self, record: &IntegrationRecord) -> Result<()> {
        let Some(pending) = record.metadata.get(PENDING_CLEANUP_KEY).and_then(|v| v.as_array())
        else {
            return Ok(());
        };
        if pending.is_empty() {
            return Ok(());
        }

        let plugin = self.factory.create_from_persisted(record)?;
        let mut remaining = Vec::new();
        let mut resolved = 0usize;

        for raw in pending {
            let entry: PendingCleanup = match serde_json::from_value(raw.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    // A malformed entry can never succeed; drop it
                    warn!(integration_id = %record.id, error = %e, "Dropping malformed cleanup entry");
                    continue;
                }
            };
            let Ok(event_type) = entry.action.parse::<EventType>() else {
                warn!(integration_id = %record.id, action = %entry.action, "Dropping cleanup entry with unknown action");
                continue;
            };

            let event = ChangeEvent {
                event_id: EventId::new(),
                event_type,
                workspace_id: record.workspace_id.clone(),
                project_id: record.project_id.clone(),
                item_name: entry.name.clone(),
                previous_name: None,
                entries: vec![EventEntry {
                    environment_id: crate::domain::EnvironmentId::from_string(
                        entry.environment_id.clone(),
                    ),
                    value: String::new(),
                    is_ciphertext: false,
                }],
                title: "Retrying integration cleanup".to_string(),
            };

            match plugin.emit_event(record, &event).await {
                Ok(()) => resolved += 1,
                Err(e) => {
                    debug!(integration_id = %record.id, error = %e, "Cleanup retry failed; keeping entry");
                    remaining.push(raw.clone());
                }
            }
        }

        if resolved == 0 && remaining.len() == pending.len() {
            return Ok(());
        }

        let mut metadata = record.metadata.clone();
        if let Some(map) = metadata.as_object_mut() {
            if remaining.is_empty() {
                map.remove(PENDING_CLEANUP_KEY);
            } else {
                map.insert(PENDING_CLEANUP_KEY.to_string(), serde_json::Value::Array(remaining));
            }
        }

        match self
            .integrations
            .update_metadata_guarded(&record.id, record.updated_at, &metadata)
            .await?
        {
            true => info!(integration_id = %record.id, resolved, "Reconciled pending cleanup"),
            false => {
                debug!(integration_id = %record.id, "Metadata moved during reconciliation; treating as resolved")
            }
        }
        Ok(())
    }
}
