//! AWS Lambda integration.
//!
//! Sync-class target: mirrors values into one Lambda function's environment
//! variables via `UpdateFunctionConfiguration`. Exactly one internal
//! environment may be mapped. SDK clients are built per call from an
//! injected factory so no credentials or connection state survives across
//! integrations.
//!
//! As with Vercel, `init` stores the server-encrypted project private key in
//! the function environment under `VAULTLINE_PRIVATE_KEY`; later ciphertext
//! deliveries read it back and decrypt locally before writing.

use crate::crypto;
use crate::domain::{EventId, EventType};
use crate::errors::{Result, VaultlineError};
use crate::storage::IntegrationRecord;
use async_trait::async_trait;
use aws_sdk_lambda::config::{BehaviorVersion, Credentials, Region};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::factory::PluginDeps;
use super::plugin::{record_run, ChangeEvent, IntegrationPlugin};
use super::types::IntegrationType;
use super::vercel::PRIVATE_KEY_VARIABLE;

pub(crate) const INIT_RUN_TITLE: &str = "Initializing AWS Lambda integration";
pub(crate) const SYNC_RUN_TITLE: &str = "Updating AWS Lambda environment variables";
pub(crate) const REMOVE_RUN_TITLE: &str = "Removing AWS Lambda environment variables";

#[derive(Debug, Clone, Deserialize)]
pub struct LambdaMetadata {
    #[serde(rename = "lambdaFunctionName")]
    pub function_name: String,
    pub region: String,
    #[serde(rename = "accessKeyId")]
    pub access_key_id: String,
    #[serde(rename = "secretAccessKey")]
    pub secret_access_key: String,
}

/// Builds a Lambda client per call from integration-supplied credentials.
/// Swappable so tests can point at a local endpoint.
#[async_trait]
pub trait LambdaClientFactory: Send + Sync {
    async fn client(&self, metadata: &LambdaMetadata) -> Result<aws_sdk_lambda::Client>;
}

/// Production factory backed by the shared AWS SDK config loader
#[derive(Debug, Default)]
pub struct SdkLambdaClientFactory {
    /// Override for local stacks and tests
    pub endpoint_url: Option<String>,
}

#[async_trait]
impl LambdaClientFactory for SdkLambdaClientFactory {
    async fn client(&self, metadata: &LambdaMetadata) -> Result<aws_sdk_lambda::Client> {
        let credentials = Credentials::new(
            metadata.access_key_id.clone(),
            metadata.secret_access_key.clone(),
            None,
            None,
            "integration-metadata",
        );
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(metadata.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        Ok(aws_sdk_lambda::Client::new(&config))
    }
}

pub struct AwsLambdaPlugin {
    deps: PluginDeps,
}

impl AwsLambdaPlugin {
    pub fn new(deps: PluginDeps) -> Self {
        Self { deps }
    }

    fn metadata(&self, metadata: &serde_json::Value) -> Result<LambdaMetadata> {
        serde_json::from_value(metadata.clone())
            .map_err(|e| VaultlineError::bad_request("Invalid AWS Lambda metadata", e.to_string()))
    }

    /// Current environment-variable map of the function
    async fn fetch_environment(
        &self,
        client: &aws_sdk_lambda::Client,
        function_name: &str,
    ) -> Result<HashMap<String, String>> {
        let output = client
            .get_function_configuration()
            .function_name(function_name)
            .send()
            .await
            .map_err(|e| {
                VaultlineError::bad_request(
                    "Failed to read AWS Lambda configuration",
                    e.to_string(),
                )
            })?;
        Ok(output
            .environment()
            .and_then(|env| env.variables())
            .cloned()
            .unwrap_or_default())
    }

    /// Replace the function's environment with `variables`
    async fn write_environment(
        &self,
        client: &aws_sdk_lambda::Client,
        function_name: &str,
        variables: HashMap<String, String>,
    ) -> Result<()> {
        let environment = aws_sdk_lambda::types::Environment::builder()
            .set_variables(Some(variables))
            .build();
        client
            .update_function_configuration()
            .function_name(function_name)
            .environment(environment)
            .send()
            .await
            .map_err(|e| {
                VaultlineError::bad_request(
                    "Failed to update AWS Lambda configuration",
                    e.to_string(),
                )
            })?;
        Ok(())
    }

    async fn sync_entries(
        &self,
        config: &LambdaMetadata,
        event: &ChangeEvent,
        values: Vec<(String, bool)>,
    ) -> Result<String> {
        let name = event
            .item_name
            .as_deref()
            .ok_or_else(|| VaultlineError::internal("Change event is missing the item name"))?;

        let client = self.deps.lambda_clients.client(config).await?;
        let mut variables = self.fetch_environment(&client, &config.function_name).await?;

        let needs_key = values.iter().any(|(_, is_ciphertext)| *is_ciphertext);
        let private_key = if needs_key {
            let wrapped = variables.get(PRIVATE_KEY_VARIABLE).cloned().ok_or_else(|| {
                VaultlineError::bad_request(
                    "Cannot decrypt secret values",
                    "The Lambda function does not hold the project private key",
                )
            })?;
            Some(self.deps.server_crypto.decrypt(&wrapped)?)
        } else {
            None
        };

        if let Some(previous) = &event.previous_name {
            variables.remove(previous);
        }
        let mut written = 0usize;
        for (value, is_ciphertext) in values {
            let plaintext = match (&private_key, is_ciphertext) {
                (Some(key), true) => crypto::decrypt_asymmetric(key, &value)?,
                _ => value,
            };
            variables.insert(name.to_string(), plaintext);
            written += 1;
        }

        self.write_environment(&client, &config.function_name, variables).await?;
        Ok(format!("Wrote {} environment variable(s) to AWS Lambda", written))
    }

    async fn remove_entries(
        &self,
        config: &LambdaMetadata,
        integration: &IntegrationRecord,
        event: &ChangeEvent,
    ) -> Result<String> {
        let name = match (&event.item_name, event.event_type) {
            (Some(name), _) => name.as_str(),
            (None, EventType::EnvironmentDeleted) => PRIVATE_KEY_VARIABLE,
            (None, _) => {
                return Err(VaultlineError::internal("Change event is missing the item name"))
            }
        };

        let client = self.deps.lambda_clients.client(config).await?;
        let mut variables = self.fetch_environment(&client, &config.function_name).await?;
        let removed = variables.remove(name).is_some();
        if removed {
            self.write_environment(&client, &config.function_name, variables).await?;
        }

        if event.event_type == EventType::EnvironmentDeleted {
            for entry in event.entries_for(integration) {
                self.deps
                    .integrations
                    .disconnect_environment(&integration.id, &entry.environment_id)
                    .await?;
            }
        }
        Ok(format!(
            "Removed {} environment variable(s) from AWS Lambda",
            if removed { 1 } else { 0 }
        ))
    }
}

#[async_trait]
impl IntegrationPlugin for AwsLambdaPlugin {
    fn integration_type(&self) -> IntegrationType {
        IntegrationType::AwsLambda
    }

    /// Live check: `GetFunctionConfiguration` proves the credentials, the
    /// region and the function name in one call.
    #[instrument(skip(self, metadata), name = "lambda_validate")]
    async fn validate_configuration(&self, metadata: &serde_json::Value) -> Result<()> {
        let config = self.metadata(metadata)?;
        let client = self.deps.lambda_clients.client(&config).await?;
        self.fetch_environment(&client, &config.function_name).await?;
        Ok(())
    }

    #[instrument(skip(self, integration, private_key), fields(integration_id = %integration.id), name = "lambda_init")]
    async fn init(
        &self,
        integration: &IntegrationRecord,
        private_key: Option<&str>,
        event_id: &EventId,
    ) -> Result<()> {
        let config = self.metadata(&integration.metadata)?;
        let private_key = private_key.ok_or_else(|| {
            VaultlineError::bad_request(
                "Private key required",
                "AWS Lambda integrations need the project private key to decrypt delivered values",
            )
        })?;
        let wrapped = self.deps.server_crypto.encrypt(private_key)?;

        record_run(&self.deps.runs, &integration.id, event_id, INIT_RUN_TITLE, async {
            let client = self.deps.lambda_clients.client(&config).await?;
            let mut variables = self.fetch_environment(&client, &config.function_name).await?;
            variables.insert(PRIVATE_KEY_VARIABLE.to_string(), wrapped);
            self.write_environment(&client, &config.function_name, variables).await?;
            Ok("Stored the project private key in the function environment".to_string())
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self, integration, event), fields(integration_id = %integration.id, event_type = %event.event_type), name = "lambda_emit")]
    async fn emit_event(
        &self,
        integration: &IntegrationRecord,
        event: &ChangeEvent,
    ) -> Result<()> {
        let config = self.metadata(&integration.metadata)?;
        let entries = event.entries_for(integration);

        if event.event_type.is_deletion() {
            if entries.is_empty() {
                debug!("No mapped environments affected by deletion");
                return Ok(());
            }
            record_run(&self.deps.runs, &integration.id, &event.event_id, REMOVE_RUN_TITLE, async {
                self.remove_entries(&config, integration, event).await
            })
            .await?;
            return Ok(());
        }

        if entries.is_empty() {
            debug!("Change event carries no entries; skipping external call");
            return Ok(());
        }
        let values: Vec<(String, bool)> =
            entries.iter().map(|entry| (entry.value.clone(), entry.is_ciphertext)).collect();
        record_run(&self.deps.runs, &integration.id, &event.event_id, SYNC_RUN_TITLE, async {
            self.sync_entries(&config, event, values).await
        })
        .await?;
        Ok(())
    }

    /// Remove the private key variable `init` installed
    #[instrument(skip(self, integration), fields(integration_id = %integration.id), name = "lambda_cleanup")]
    async fn cleanup(&self, integration: &IntegrationRecord) -> Result<()> {
        let config = self.metadata(&integration.metadata)?;
        let client = self.deps.lambda_clients.client(&config).await?;
        let mut variables = self.fetch_environment(&client, &config.function_name).await?;
        if variables.remove(PRIVATE_KEY_VARIABLE).is_some() {
            self.write_environment(&client, &config.function_name, variables).await?;
        }
        Ok(())
    }
}
