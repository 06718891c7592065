//! Plugin factory.
//!
//! Maps a type tag onto a concrete plugin. Plugins are stateless, so the
//! same construction path serves both pre-persistence validation
//! (`create_with_type`) and event dispatch for stored rows
//! (`create_from_persisted`).

use crate::crypto::ServerCrypto;
use crate::errors::{Result, VaultlineError};
use crate::storage::{IntegrationRecord, IntegrationRepository, IntegrationRunRepository};
use std::sync::Arc;

use super::aws_lambda::{AwsLambdaPlugin, LambdaClientFactory, SdkLambdaClientFactory};
use super::discord::DiscordPlugin;
use super::plugin::IntegrationPlugin;
use super::slack::SlackPlugin;
use super::types::IntegrationType;
use super::vercel::VercelPlugin;

pub const SLACK_API_BASE: &str = "https://slack.com/api";
pub const VERCEL_API_BASE: &str = "https://api.vercel.com";

/// Shared collaborators handed to every plugin instance
#[derive(Clone)]
pub struct PluginDeps {
    pub http: reqwest::Client,
    pub runs: IntegrationRunRepository,
    pub integrations: IntegrationRepository,
    pub server_crypto: ServerCrypto,
    pub lambda_clients: Arc<dyn LambdaClientFactory>,
    pub slack_api_base: String,
    pub vercel_api_base: String,
}

impl PluginDeps {
    pub fn new(
        runs: IntegrationRunRepository,
        integrations: IntegrationRepository,
        server_crypto: ServerCrypto,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            runs,
            integrations,
            server_crypto,
            lambda_clients: Arc::new(SdkLambdaClientFactory::default()),
            slack_api_base: SLACK_API_BASE.to_string(),
            vercel_api_base: VERCEL_API_BASE.to_string(),
        }
    }
}

/// Chooses and instantiates plugins by type tag
#[derive(Clone)]
pub struct IntegrationFactory {
    deps: PluginDeps,
}

impl IntegrationFactory {
    pub fn new(deps: PluginDeps) -> Self {
        Self { deps }
    }

    /// Stateless plugin for a known type, used for validation before any
    /// row exists
    pub fn create_with_type(&self, integration_type: IntegrationType) -> Box<dyn IntegrationPlugin> {
        match integration_type {
            IntegrationType::Discord => Box::new(DiscordPlugin::new(self.deps.clone())),
            IntegrationType::Slack => Box::new(SlackPlugin::new(self.deps.clone())),
            IntegrationType::Vercel => Box::new(VercelPlugin::new(self.deps.clone())),
            IntegrationType::AwsLambda => Box::new(AwsLambdaPlugin::new(self.deps.clone())),
        }
    }

    /// Plugin for a stored row. The type tag is persisted as text, so an
    /// unrecognized value is possible at the database level even though the
    /// enum is closed; it surfaces as a defensive internal error.
    pub fn create_from_persisted(
        &self,
        record: &IntegrationRecord,
    ) -> Result<Box<dyn IntegrationPlugin>> {
        let integration_type: IntegrationType = record
            .integration_type
            .parse()
            .map_err(|_| VaultlineError::internal("Integration type not found"))?;
        Ok(self.create_with_type(integration_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IntegrationId, WorkspaceId};

    fn record(ty: &str) -> IntegrationRecord {
        IntegrationRecord {
            id: IntegrationId::new(),
            workspace_id: WorkspaceId::new(),
            project_id: None,
            integration_type: ty.to_string(),
            name: "test".to_string(),
            metadata: serde_json::json!({}),
            notify_on: vec![],
            environment_ids: vec![],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn factory() -> IntegrationFactory {
        let pool = sqlx::Pool::connect_lazy("sqlite::memory:").unwrap();
        let crypto = ServerCrypto::for_testing();
        IntegrationFactory::new(PluginDeps::new(
            IntegrationRunRepository::new(pool.clone()),
            IntegrationRepository::new(pool, crypto.clone()),
            crypto,
        ))
    }

    #[tokio::test]
    async fn test_persisted_type_resolution() {
        let factory = factory();
        let plugin = factory.create_from_persisted(&record("DISCORD")).unwrap();
        assert_eq!(plugin.integration_type(), IntegrationType::Discord);

        let Err(err) = factory.create_from_persisted(&record("TELEGRAPH")) else {
            panic!("unknown type must not resolve to a plugin");
        };
        assert!(err.to_string().contains("Integration type not found"));
    }
}
