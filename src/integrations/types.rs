//! Integration type vocabulary.
//!
//! Each integration type is one entry in a closed enum plus a static
//! descriptor carrying its creation preconditions: permitted events,
//! required metadata keys and environment-mapping mode. Adding a type means
//! adding one enum variant and one descriptor entry.

use crate::domain::EventType;
use crate::errors::{Result, VaultlineError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How many environments must be attached when creating an integration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentSupport {
    /// Workspace-level notification targets; no environment mapping
    None,
    /// Exactly one mapped environment
    Single,
    /// One or more mapped environments
    AtLeastOne,
}

/// Supported integration types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationType {
    Discord,
    Slack,
    Vercel,
    AwsLambda,
}

/// Static creation preconditions for one integration type
#[derive(Debug)]
pub struct IntegrationDescriptor {
    pub permitted_events: &'static [EventType],
    pub required_metadata: &'static [&'static str],
    pub environment_support: EnvironmentSupport,
    pub project_required: bool,
    pub private_key_required: bool,
}

/// Every event type; notification-level integrations subscribe freely
const ALL_EVENTS: &[EventType] = &[
    EventType::WorkspaceUpdated,
    EventType::ProjectCreated,
    EventType::ProjectUpdated,
    EventType::ProjectDeleted,
    EventType::SecretAdded,
    EventType::SecretUpdated,
    EventType::SecretDeleted,
    EventType::VariableAdded,
    EventType::VariableUpdated,
    EventType::VariableDeleted,
    EventType::EnvironmentAdded,
    EventType::EnvironmentUpdated,
    EventType::EnvironmentDeleted,
];

/// Value-bearing events sync-class integrations can mirror externally
const SYNC_EVENTS: &[EventType] = &[
    EventType::SecretAdded,
    EventType::SecretUpdated,
    EventType::SecretDeleted,
    EventType::VariableAdded,
    EventType::VariableUpdated,
    EventType::VariableDeleted,
    EventType::EnvironmentUpdated,
    EventType::EnvironmentDeleted,
];

const DISCORD: IntegrationDescriptor = IntegrationDescriptor {
    permitted_events: ALL_EVENTS,
    required_metadata: &["webhookUrl"],
    environment_support: EnvironmentSupport::None,
    project_required: false,
    private_key_required: false,
};

const SLACK: IntegrationDescriptor = IntegrationDescriptor {
    permitted_events: ALL_EVENTS,
    required_metadata: &["botToken", "channelId"],
    environment_support: EnvironmentSupport::None,
    project_required: false,
    private_key_required: false,
};

const VERCEL: IntegrationDescriptor = IntegrationDescriptor {
    permitted_events: SYNC_EVENTS,
    required_metadata: &["token", "projectId", "environments"],
    environment_support: EnvironmentSupport::AtLeastOne,
    project_required: true,
    private_key_required: true,
};

const AWS_LAMBDA: IntegrationDescriptor = IntegrationDescriptor {
    permitted_events: SYNC_EVENTS,
    required_metadata: &["lambdaFunctionName", "region", "accessKeyId", "secretAccessKey"],
    environment_support: EnvironmentSupport::Single,
    project_required: true,
    private_key_required: true,
};

impl IntegrationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationType::Discord => "DISCORD",
            IntegrationType::Slack => "SLACK",
            IntegrationType::Vercel => "VERCEL",
            IntegrationType::AwsLambda => "AWS_LAMBDA",
        }
    }

    pub fn descriptor(&self) -> &'static IntegrationDescriptor {
        match self {
            IntegrationType::Discord => &DISCORD,
            IntegrationType::Slack => &SLACK,
            IntegrationType::Vercel => &VERCEL,
            IntegrationType::AwsLambda => &AWS_LAMBDA,
        }
    }

    /// Reject any subscription outside the type's permitted set
    pub fn validate_permitted_events(&self, events: &[EventType]) -> Result<()> {
        let permitted = self.descriptor().permitted_events;
        for event in events {
            if !permitted.contains(event) {
                return Err(VaultlineError::bad_request(
                    "Event not supported by integration",
                    format!(
                        "Event '{}' is not supported by {} integrations",
                        event,
                        self.as_str()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Require every mandatory metadata key to be present and non-empty.
    /// On update, keys the caller is not changing may be omitted, but a
    /// supplied key must still carry a usable value.
    pub fn validate_metadata(&self, metadata: &serde_json::Value, is_update: bool) -> Result<()> {
        for key in self.descriptor().required_metadata {
            match metadata.get(*key) {
                None if is_update => continue,
                None => return Err(missing_parameter(key)),
                Some(value) => {
                    let empty = match value {
                        serde_json::Value::String(s) => s.trim().is_empty(),
                        serde_json::Value::Null => true,
                        serde_json::Value::Object(map) => map.is_empty(),
                        serde_json::Value::Array(items) => items.is_empty(),
                        _ => false,
                    };
                    if empty {
                        return Err(missing_parameter(key));
                    }
                }
            }
        }
        Ok(())
    }
}

fn missing_parameter(key: &str) -> VaultlineError {
    VaultlineError::bad_request(
        "Missing metadata parameter",
        format!("Missing metadata parameter {}", key),
    )
}

impl fmt::Display for IntegrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DISCORD" => Ok(IntegrationType::Discord),
            "SLACK" => Ok(IntegrationType::Slack),
            "VERCEL" => Ok(IntegrationType::Vercel),
            "AWS_LAMBDA" => Ok(IntegrationType::AwsLambda),
            other => Err(format!("Unknown integration type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_roundtrip() {
        for ty in [
            IntegrationType::Discord,
            IntegrationType::Slack,
            IntegrationType::Vercel,
            IntegrationType::AwsLambda,
        ] {
            assert_eq!(ty.as_str().parse::<IntegrationType>().unwrap(), ty);
        }
        assert!("TEAMS".parse::<IntegrationType>().is_err());
    }

    #[test]
    fn test_permitted_events_rejects_unsupported() {
        let err = IntegrationType::Vercel
            .validate_permitted_events(&[EventType::SecretAdded, EventType::WorkspaceUpdated])
            .unwrap_err();
        assert!(err.to_string().contains("Event not supported by integration"));

        IntegrationType::Discord
            .validate_permitted_events(&[EventType::WorkspaceUpdated])
            .unwrap();
    }

    #[test]
    fn test_metadata_requires_all_keys_on_create() {
        let err = IntegrationType::Slack
            .validate_metadata(&json!({ "botToken": "xoxb-1" }), false)
            .unwrap_err();
        assert!(err.to_string().contains("Missing metadata parameter channelId"));

        IntegrationType::Slack
            .validate_metadata(&json!({ "botToken": "xoxb-1", "channelId": "C1" }), false)
            .unwrap();
    }

    #[test]
    fn test_metadata_rejects_empty_values() {
        let err = IntegrationType::Discord
            .validate_metadata(&json!({ "webhookUrl": "   " }), false)
            .unwrap_err();
        assert!(err.to_string().contains("Missing metadata parameter webhookUrl"));
    }

    #[test]
    fn test_metadata_update_relaxes_absent_keys() {
        IntegrationType::AwsLambda
            .validate_metadata(&json!({ "region": "us-east-1" }), true)
            .unwrap();

        let err = IntegrationType::AwsLambda
            .validate_metadata(&json!({ "region": "" }), true)
            .unwrap_err();
        assert!(err.to_string().contains("Missing metadata parameter region"));
    }
}
