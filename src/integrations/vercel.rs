//! Vercel integration.
//!
//! Sync-class target: mirrors secrets and variables into a Vercel project's
//! environment variables. Each internal environment maps to either a Vercel
//! system environment ("production", "preview", "development") or a custom
//! environment id; entries for unmapped environments are silently skipped.
//!
//! `init` uploads the project private key (server-encrypted) as the
//! `VAULTLINE_PRIVATE_KEY` variable. When a later event carries ciphertext,
//! the plugin reads that variable back, unwraps it and decrypts locally
//! before forwarding; a missing key aborts the attempt with a FAILED run so
//! ciphertext never lands in Vercel unannounced.

use crate::crypto;
use crate::domain::{EventId, EventType};
use crate::errors::{Result, VaultlineError};
use crate::storage::IntegrationRecord;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::factory::PluginDeps;
use super::plugin::{record_run, ChangeEvent, EventEntry, IntegrationPlugin};
use super::types::IntegrationType;

/// Name under which the project private key lives in the external system
pub const PRIVATE_KEY_VARIABLE: &str = "VAULTLINE_PRIVATE_KEY";

pub(crate) const INIT_RUN_TITLE: &str = "Initializing Vercel integration";
pub(crate) const SYNC_RUN_TITLE: &str = "Syncing environment variables to Vercel";
pub(crate) const REMOVE_RUN_TITLE: &str = "Removing environment variables from Vercel";

/// External target for one mapped internal environment
#[derive(Debug, Clone, Deserialize)]
struct EnvironmentMapping {
    #[serde(rename = "systemEnvironment")]
    system_environment: Option<String>,
    #[serde(rename = "customEnvironmentId")]
    custom_environment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VercelMetadata {
    token: String,
    #[serde(rename = "projectId")]
    project_id: String,
    /// Internal environment id -> external target
    environments: HashMap<String, EnvironmentMapping>,
}

#[derive(Debug, Deserialize)]
struct EnvVarRecord {
    id: String,
    key: String,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvVarListing {
    envs: Vec<EnvVarRecord>,
}

pub struct VercelPlugin {
    deps: PluginDeps,
}

impl VercelPlugin {
    pub fn new(deps: PluginDeps) -> Self {
        Self { deps }
    }

    fn metadata(&self, metadata: &serde_json::Value) -> Result<VercelMetadata> {
        serde_json::from_value(metadata.clone())
            .map_err(|e| VaultlineError::bad_request("Invalid Vercel metadata", e.to_string()))
    }

    async fn list_env_vars(&self, config: &VercelMetadata) -> Result<EnvVarListing> {
        let url = format!(
            "{}/v9/projects/{}/env?decrypt=true",
            self.deps.vercel_api_base, config.project_id
        );
        let response = self
            .deps
            .http
            .get(&url)
            .bearer_auth(&config.token)
            .send()
            .await
            .map_err(|e| {
                VaultlineError::bad_request("Failed to reach Vercel", e.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(VaultlineError::bad_request(
                "Failed to list Vercel environment variables",
                format!("Vercel returned {}: {}", status, body),
            ));
        }
        serde_json::from_str(&body).map_err(|_| {
            VaultlineError::bad_request(
                "Failed to list Vercel environment variables",
                format!("Unexpected Vercel response: {}", body),
            )
        })
    }

    /// Upsert one variable into the targets for a mapped environment
    async fn upsert_env_var(
        &self,
        config: &VercelMetadata,
        mapping: &EnvironmentMapping,
        key: &str,
        value: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/v10/projects/{}/env?upsert=true",
            self.deps.vercel_api_base, config.project_id
        );
        let mut payload = serde_json::json!({
            "key": key,
            "value": value,
            "type": "encrypted",
        });
        if let Some(system) = &mapping.system_environment {
            payload["target"] = serde_json::json!([system]);
        }
        if let Some(custom) = &mapping.custom_environment_id {
            payload["customEnvironmentIds"] = serde_json::json!([custom]);
        }

        let response = self
            .deps
            .http
            .post(&url)
            .bearer_auth(&config.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                VaultlineError::bad_request("Failed to reach Vercel", e.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(VaultlineError::bad_request(
                "Failed to write Vercel environment variable",
                format!("Vercel returned {}: {}", status, body),
            ));
        }
        Ok(body)
    }

    async fn rename_env_var(
        &self,
        config: &VercelMetadata,
        env_var_id: &str,
        new_key: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/v9/projects/{}/env/{}",
            self.deps.vercel_api_base, config.project_id, env_var_id
        );
        let response = self
            .deps
            .http
            .patch(&url)
            .bearer_auth(&config.token)
            .json(&serde_json::json!({ "key": new_key }))
            .send()
            .await
            .map_err(|e| {
                VaultlineError::bad_request("Failed to reach Vercel", e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VaultlineError::bad_request(
                "Failed to rename Vercel environment variable",
                format!("Vercel returned {}: {}", status, body),
            ));
        }
        Ok(())
    }

    async fn delete_env_var(&self, config: &VercelMetadata, env_var_id: &str) -> Result<()> {
        let url = format!(
            "{}/v9/projects/{}/env/{}",
            self.deps.vercel_api_base, config.project_id, env_var_id
        );
        let response = self
            .deps
            .http
            .delete(&url)
            .bearer_auth(&config.token)
            .send()
            .await
            .map_err(|e| {
                VaultlineError::bad_request("Failed to reach Vercel", e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VaultlineError::bad_request(
                "Failed to delete Vercel environment variable",
                format!("Vercel returned {}: {}", status, body),
            ));
        }
        Ok(())
    }

    /// Read the project private key back from the external system and
    /// unwrap the server-level encryption
    async fn external_private_key(&self, config: &VercelMetadata) -> Result<String> {
        let listing = self.list_env_vars(config).await?;
        let wrapped = listing
            .envs
            .iter()
            .find(|record| record.key == PRIVATE_KEY_VARIABLE)
            .and_then(|record| record.value.clone())
            .ok_or_else(|| {
                VaultlineError::bad_request(
                    "Cannot decrypt secret values",
                    "The external system does not hold the project private key",
                )
            })?;
        self.deps.server_crypto.decrypt(&wrapped)
    }

    /// Plaintext form of the event's entries, restricted to mapped
    /// environments. Ciphertext entries require the externally stored key.
    async fn resolve_entries(
        &self,
        config: &VercelMetadata,
        entries: &[&EventEntry],
    ) -> Result<Vec<(EnvironmentMapping, String)>> {
        let needs_key = entries.iter().any(|entry| entry.is_ciphertext);
        let private_key =
            if needs_key { Some(self.external_private_key(config).await?) } else { None };

        let mut resolved = Vec::new();
        for entry in entries {
            let Some(mapping) = config.environments.get(entry.environment_id.as_str()) else {
                debug!(environment_id = %entry.environment_id, "Environment not mapped to Vercel");
                continue;
            };
            let value = match (&private_key, entry.is_ciphertext) {
                (Some(key), true) => crypto::decrypt_asymmetric(key, &entry.value)?,
                _ => entry.value.clone(),
            };
            resolved.push((mapping.clone(), value));
        }
        Ok(resolved)
    }

    async fn sync_entries(
        &self,
        config: &VercelMetadata,
        event: &ChangeEvent,
        entries: &[&EventEntry],
    ) -> Result<String> {
        let name = event
            .item_name
            .as_deref()
            .ok_or_else(|| VaultlineError::internal("Change event is missing the item name"))?;

        // Rename first so the upsert below targets the new key
        if let Some(previous) = &event.previous_name {
            let listing = self.list_env_vars(config).await?;
            for record in listing.envs.iter().filter(|r| r.key == *previous) {
                self.rename_env_var(config, &record.id, name).await?;
            }
        }

        let resolved = self.resolve_entries(config, entries).await?;
        let mut written = 0usize;
        for (mapping, value) in &resolved {
            self.upsert_env_var(config, mapping, name, value).await?;
            written += 1;
        }
        Ok(format!("Wrote {} environment variable(s) to Vercel", written))
    }

    async fn remove_entries(
        &self,
        config: &VercelMetadata,
        integration: &IntegrationRecord,
        event: &ChangeEvent,
        entries: &[&EventEntry],
    ) -> Result<String> {
        // Item deletions remove that item's variable; an environment
        // deletion removes the key variable this integration installed
        let name = match (&event.item_name, event.event_type) {
            (Some(name), _) => name.as_str(),
            (None, EventType::EnvironmentDeleted) => PRIVATE_KEY_VARIABLE,
            (None, _) => {
                return Err(VaultlineError::internal("Change event is missing the item name"))
            }
        };

        let listing = self.list_env_vars(config).await?;
        let mut removed = 0usize;
        for record in listing.envs.iter().filter(|r| r.key == name) {
            self.delete_env_var(config, &record.id).await?;
            removed += 1;
        }

        if event.event_type == EventType::EnvironmentDeleted {
            for entry in entries {
                self.deps
                    .integrations
                    .disconnect_environment(&integration.id, &entry.environment_id)
                    .await?;
            }
        }
        Ok(format!("Removed {} environment variable(s) from Vercel", removed))
    }
}

#[async_trait]
impl IntegrationPlugin for VercelPlugin {
    fn integration_type(&self) -> IntegrationType {
        IntegrationType::Vercel
    }

    /// Live check: list the project's environment variables, proving both
    /// the token and the project id.
    #[instrument(skip(self, metadata), name = "vercel_validate")]
    async fn validate_configuration(&self, metadata: &serde_json::Value) -> Result<()> {
        let config = self.metadata(metadata)?;
        self.list_env_vars(&config).await?;
        Ok(())
    }

    #[instrument(skip(self, integration, private_key), fields(integration_id = %integration.id), name = "vercel_init")]
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
                "Vercel integrations need the project private key to decrypt delivered values",
            )
        })?;
        let wrapped = self.deps.server_crypto.encrypt(private_key)?;

        record_run(&self.deps.runs, &integration.id, event_id, INIT_RUN_TITLE, async {
            let mut written = 0usize;
            for mapping in config.environments.values() {
                self.upsert_env_var(&config, mapping, PRIVATE_KEY_VARIABLE, &wrapped).await?;
                written += 1;
            }
            Ok(format!("Stored the project private key in {} target(s)", written))
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self, integration, event), fields(integration_id = %integration.id, event_type = %event.event_type), name = "vercel_emit")]
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
                self.remove_entries(&config, integration, event, &entries).await
            })
            .await?;
            return Ok(());
        }

        // No value-bearing entries means nothing to mirror
        if entries.is_empty() {
            debug!("Change event carries no entries; skipping external call");
            return Ok(());
        }
        record_run(&self.deps.runs, &integration.id, &event.event_id, SYNC_RUN_TITLE, async {
            self.sync_entries(&config, event, &entries).await
        })
        .await?;
        Ok(())
    }

    /// Remove the private key variable `init` installed
    #[instrument(skip(self, integration), fields(integration_id = %integration.id), name = "vercel_cleanup")]
    async fn cleanup(&self, integration: &IntegrationRecord) -> Result<()> {
        let config = self.metadata(&integration.metadata)?;
        let listing = self.list_env_vars(&config).await?;
        for record in listing.envs.iter().filter(|r| r.key == PRIVATE_KEY_VARIABLE) {
            self.delete_env_var(&config, &record.id).await?;
        }
        Ok(())
    }
}
