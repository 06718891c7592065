//! Slack integration.
//!
//! Notification-level target posting to one channel via the Web API. Slack
//! wraps failures in an `{ok: false, error}` envelope rather than HTTP
//! status codes, so every call checks the envelope and forwards Slack's own
//! error string.

use crate::domain::EventId;
use crate::errors::{Result, VaultlineError};
use crate::storage::IntegrationRecord;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use super::factory::PluginDeps;
use super::plugin::{record_run, ChangeEvent, IntegrationPlugin};
use super::types::IntegrationType;

pub(crate) const INIT_RUN_TITLE: &str = "Initializing Slack integration";
pub(crate) const EMIT_RUN_TITLE: &str = "Posting message to Slack";

#[derive(Debug, Deserialize)]
struct SlackMetadata {
    #[serde(rename = "botToken")]
    bot_token: String,
    #[serde(rename = "channelId")]
    channel_id: String,
}

/// Common envelope of every Slack Web API response
#[derive(Debug, Deserialize)]
struct SlackEnvelope {
    ok: bool,
    error: Option<String>,
}

pub struct SlackPlugin {
    deps: PluginDeps,
}

impl SlackPlugin {
    pub fn new(deps: PluginDeps) -> Self {
        Self { deps }
    }

    fn metadata(&self, metadata: &serde_json::Value) -> Result<SlackMetadata> {
        serde_json::from_value(metadata.clone())
            .map_err(|e| VaultlineError::bad_request("Invalid Slack metadata", e.to_string()))
    }

    /// POST one Web API method and unwrap the `{ok, error}` envelope
    async fn call(
        &self,
        token: &str,
        method: &str,
        payload: &serde_json::Value,
        failure_header: &str,
    ) -> Result<String> {
        let url = format!("{}/{}", self.deps.slack_api_base, method);
        let response = self
            .deps
            .http
            .post(&url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
            .map_err(|e| VaultlineError::bad_request(failure_header.to_string(), e.to_string()))?;

        let body = response.text().await.unwrap_or_default();
        let envelope: SlackEnvelope = serde_json::from_str(&body).map_err(|_| {
            VaultlineError::bad_request(
                failure_header.to_string(),
                format!("Unexpected Slack response: {}", body),
            )
        })?;

        if !envelope.ok {
            return Err(VaultlineError::bad_request(
                failure_header.to_string(),
                envelope.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }
        Ok(body)
    }

    async fn post_message(&self, config: &SlackMetadata, text: &str) -> Result<String> {
        self.call(
            &config.bot_token,
            "chat.postMessage",
            &serde_json::json!({ "channel": config.channel_id, "text": text }),
            "Failed to post message to Slack",
        )
        .await
    }
}

#[async_trait]
impl IntegrationPlugin for SlackPlugin {
    fn integration_type(&self) -> IntegrationType {
        IntegrationType::Slack
    }

    /// Live check: `auth.test` proves the token, then a `conversations.info`
    /// probe proves the bot can see the target channel.
    #[instrument(skip(self, metadata), name = "slack_validate")]
    async fn validate_configuration(&self, metadata: &serde_json::Value) -> Result<()> {
        let config = self.metadata(metadata)?;
        self.call(
            &config.bot_token,
            "auth.test",
            &serde_json::json!({}),
            "Invalid Slack bot token",
        )
        .await?;
        self.call(
            &config.bot_token,
            "conversations.info",
            &serde_json::json!({ "channel": config.channel_id }),
            "Slack channel not accessible",
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, integration, _private_key), fields(integration_id = %integration.id), name = "slack_init")]
    async fn init(
        &self,
        integration: &IntegrationRecord,
        _private_key: Option<&str>,
        event_id: &EventId,
    ) -> Result<()> {
        let config = self.metadata(&integration.metadata)?;
        record_run(&self.deps.runs, &integration.id, event_id, INIT_RUN_TITLE, async {
            self.post_message(
                &config,
                &format!("Integration '{}' is now connected.", integration.name),
            )
            .await
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self, integration, event), fields(integration_id = %integration.id, event_type = %event.event_type), name = "slack_emit")]
    async fn emit_event(
        &self,
        integration: &IntegrationRecord,
        event: &ChangeEvent,
    ) -> Result<()> {
        let config = self.metadata(&integration.metadata)?;
        let text = match &event.item_name {
            Some(name) => format!("{}: {}", event.title, name),
            None => event.title.clone(),
        };
        record_run(&self.deps.runs, &integration.id, &event.event_id, EMIT_RUN_TITLE, async {
            self.post_message(&config, &text).await
        })
        .await?;
        Ok(())
    }
}
