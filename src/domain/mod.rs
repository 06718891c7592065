//! Core domain types: identifiers and the closed enums shared across the
//! engine, the integration layer and the audit trail.

mod id;

pub use id::{
    EnvironmentId, EventId, IntegrationId, ItemId, ProjectId, RunId, UserId, WorkspaceId,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a config item. Secrets are encrypted at rest with the project's
/// public key; variables are stored in the clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Secret,
    Variable,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Secret => "secret",
            ItemKind::Variable => "variable",
        }
    }

    /// Capitalized label for user-facing messages ("Secret 'x' already exists")
    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Secret => "Secret",
            ItemKind::Variable => "Variable",
        }
    }

    /// The change-event type for this kind and lifecycle stage
    pub fn event(&self, stage: LifecycleStage) -> EventType {
        match (self, stage) {
            (ItemKind::Secret, LifecycleStage::Added) => EventType::SecretAdded,
            (ItemKind::Secret, LifecycleStage::Updated) => EventType::SecretUpdated,
            (ItemKind::Secret, LifecycleStage::Deleted) => EventType::SecretDeleted,
            (ItemKind::Variable, LifecycleStage::Added) => EventType::VariableAdded,
            (ItemKind::Variable, LifecycleStage::Updated) => EventType::VariableUpdated,
            (ItemKind::Variable, LifecycleStage::Deleted) => EventType::VariableDeleted,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "secret" => Ok(ItemKind::Secret),
            "variable" => Ok(ItemKind::Variable),
            other => Err(format!("Unknown item kind: {}", other)),
        }
    }
}

/// Lifecycle stage of a change, used to derive the concrete [`EventType`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Added,
    Updated,
    Deleted,
}

/// Change-event types integrations can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    WorkspaceUpdated,
    ProjectCreated,
    ProjectUpdated,
    ProjectDeleted,
    SecretAdded,
    SecretUpdated,
    SecretDeleted,
    VariableAdded,
    VariableUpdated,
    VariableDeleted,
    EnvironmentAdded,
    EnvironmentUpdated,
    EnvironmentDeleted,
    IntegrationAdded,
    IntegrationUpdated,
    IntegrationDeleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WorkspaceUpdated => "WORKSPACE_UPDATED",
            EventType::ProjectCreated => "PROJECT_CREATED",
            EventType::ProjectUpdated => "PROJECT_UPDATED",
            EventType::ProjectDeleted => "PROJECT_DELETED",
            EventType::SecretAdded => "SECRET_ADDED",
            EventType::SecretUpdated => "SECRET_UPDATED",
            EventType::SecretDeleted => "SECRET_DELETED",
            EventType::VariableAdded => "VARIABLE_ADDED",
            EventType::VariableUpdated => "VARIABLE_UPDATED",
            EventType::VariableDeleted => "VARIABLE_DELETED",
            EventType::EnvironmentAdded => "ENVIRONMENT_ADDED",
            EventType::EnvironmentUpdated => "ENVIRONMENT_UPDATED",
            EventType::EnvironmentDeleted => "ENVIRONMENT_DELETED",
            EventType::IntegrationAdded => "INTEGRATION_ADDED",
            EventType::IntegrationUpdated => "INTEGRATION_UPDATED",
            EventType::IntegrationDeleted => "INTEGRATION_DELETED",
        }
    }

    /// True for the delete-class events the reconciler can replay
    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            EventType::SecretDeleted
                | EventType::VariableDeleted
                | EventType::EnvironmentDeleted
                | EventType::ProjectDeleted
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WORKSPACE_UPDATED" => Ok(EventType::WorkspaceUpdated),
            "PROJECT_CREATED" => Ok(EventType::ProjectCreated),
            "PROJECT_UPDATED" => Ok(EventType::ProjectUpdated),
            "PROJECT_DELETED" => Ok(EventType::ProjectDeleted),
            "SECRET_ADDED" => Ok(EventType::SecretAdded),
            "SECRET_UPDATED" => Ok(EventType::SecretUpdated),
            "SECRET_DELETED" => Ok(EventType::SecretDeleted),
            "VARIABLE_ADDED" => Ok(EventType::VariableAdded),
            "VARIABLE_UPDATED" => Ok(EventType::VariableUpdated),
            "VARIABLE_DELETED" => Ok(EventType::VariableDeleted),
            "ENVIRONMENT_ADDED" => Ok(EventType::EnvironmentAdded),
            "ENVIRONMENT_UPDATED" => Ok(EventType::EnvironmentUpdated),
            "ENVIRONMENT_DELETED" => Ok(EventType::EnvironmentDeleted),
            "INTEGRATION_ADDED" => Ok(EventType::IntegrationAdded),
            "INTEGRATION_UPDATED" => Ok(EventType::IntegrationUpdated),
            "INTEGRATION_DELETED" => Ok(EventType::IntegrationDeleted),
            other => Err(format!("Unknown event type: {}", other)),
        }
    }
}

/// Terminal/running status of an integration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("Unknown run status: {}", other)),
        }
    }
}

/// Whether an audit event was triggered by a user action or by the system
/// (rotation sweeps, reconciler retries)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSource {
    User,
    System,
}

impl AuditSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSource::User => "user",
            AuditSource::System => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        for event in [
            EventType::WorkspaceUpdated,
            EventType::SecretAdded,
            EventType::SecretUpdated,
            EventType::SecretDeleted,
            EventType::VariableAdded,
            EventType::EnvironmentDeleted,
        ] {
            let parsed: EventType = event.as_str().parse().unwrap();
            assert_eq!(event, parsed);
        }
        assert!("SECRET_EXPLODED".parse::<EventType>().is_err());
    }

    #[test]
    fn test_item_kind_event_mapping() {
        assert_eq!(ItemKind::Secret.event(LifecycleStage::Added), EventType::SecretAdded);
        assert_eq!(ItemKind::Variable.event(LifecycleStage::Deleted), EventType::VariableDeleted);
    }

    #[test]
    fn test_run_status_roundtrip() {
        for status in [RunStatus::Running, RunStatus::Success, RunStatus::Failed] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
    }
}
