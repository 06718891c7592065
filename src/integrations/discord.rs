//! Discord integration.
//!
//! Notification-level target: posts a message to a configured webhook for
//! every subscribed event. No environment mapping and no value forwarding,
//! so secret material never leaves the system through this plugin.

use crate::domain::EventId;
use crate::errors::{Result, VaultlineError};
use crate::storage::IntegrationRecord;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use super::factory::PluginDeps;
use super::plugin::{record_run, ChangeEvent, IntegrationPlugin};
use super::types::IntegrationType;

pub(crate) const INIT_RUN_TITLE: &str = "Initializing Discord integration";
pub(crate) const EMIT_RUN_TITLE: &str = "Posting message to Discord";

#[derive(Debug, Deserialize)]
struct DiscordMetadata {
    #[serde(rename = "webhookUrl")]
    webhook_url: String,
}

pub struct DiscordPlugin {
    deps: PluginDeps,
}

impl DiscordPlugin {
    pub fn new(deps: PluginDeps) -> Self {
        Self { deps }
    }

    fn metadata(&self, metadata: &serde_json::Value) -> Result<DiscordMetadata> {
        serde_json::from_value(metadata.clone()).map_err(|e| {
            VaultlineError::bad_request("Invalid Discord metadata", e.to_string())
        })
    }

    async fn post_message(&self, webhook_url: &str, content: &str) -> Result<String> {
        let response = self
            .deps
            .http
            .post(webhook_url)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .map_err(|e| {
                VaultlineError::bad_request("Failed to post message to Discord", e.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(VaultlineError::bad_request(
                "Failed to post message to Discord",
                format!("Discord returned {}: {}", status, body),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl IntegrationPlugin for DiscordPlugin {
    fn integration_type(&self) -> IntegrationType {
        IntegrationType::Discord
    }

    /// Live check: the webhook endpoint must answer a GET with its own
    /// metadata, proving the URL is real and reachable.
    #[instrument(skip(self, metadata), name = "discord_validate")]
    async fn validate_configuration(&self, metadata: &serde_json::Value) -> Result<()> {
        let config = self.metadata(metadata)?;
        let response = self.deps.http.get(&config.webhook_url).send().await.map_err(|e| {
            VaultlineError::bad_request("Invalid Discord webhook", e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VaultlineError::bad_request(
                "Invalid Discord webhook",
                format!("Discord returned {}: {}", status, body),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, integration, _private_key), fields(integration_id = %integration.id), name = "discord_init")]
    async fn init(
        &self,
        integration: &IntegrationRecord,
        _private_key: Option<&str>,
        event_id: &EventId,
    ) -> Result<()> {
        let config = self.metadata(&integration.metadata)?;
        record_run(&self.deps.runs, &integration.id, event_id, INIT_RUN_TITLE, async {
            self.post_message(
                &config.webhook_url,
                &format!("Integration '{}' is now connected.", integration.name),
            )
            .await
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self, integration, event), fields(integration_id = %integration.id, event_type = %event.event_type), name = "discord_emit")]
    async fn emit_event(
        &self,
        integration: &IntegrationRecord,
        event: &ChangeEvent,
    ) -> Result<()> {
        let config = self.metadata(&integration.metadata)?;
        let content = match &event.item_name {
            Some(name) => format!("**{}**: {}", event.title, name),
            None => format!("**{}**", event.title),
        };
        record_run(&self.deps.runs, &integration.id, &event.event_id, EMIT_RUN_TITLE, async {
            self.post_message(&config.webhook_url, &content).await
        })
        .await?;
        Ok(())
    }
}
