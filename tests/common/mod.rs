//! Common test utilities for all integration tests.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use base64::Engine;
use std::sync::Arc;

use vaultline::config::{CryptoConfig, DatabaseConfig};
use vaultline::crypto::{self, ProjectKeyPair, ServerCrypto};
use vaultline::domain::{ProjectId, UserId, WorkspaceId};
use vaultline::integrations::{
    IntegrationFactory, IntegrationService, PluginDeps, SdkLambdaClientFactory,
};
use vaultline::notify::ChangeNotifier;
use vaultline::services::{AllowAll, ItemService};
use vaultline::storage::{
    create_pool, AuditLogRepository, CreateEnvironmentRequest, CreateProjectRequest,
    EnvironmentRecord, EnvironmentRepository, IntegrationRepository, IntegrationRunRepository,
    ProjectRecord, ProjectRepository,
};

/// In-memory pool; a single connection keeps the database shared
pub async fn create_test_pool() -> sqlx::Pool<sqlx::Sqlite> {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        connect_timeout_secs: 5,
        auto_migrate: true,
    };
    create_pool(&config).await.unwrap()
}

/// File-backed pool for tests that need real connection concurrency.
/// Returns the tempdir so it lives as long as the pool.
pub async fn create_file_pool() -> (sqlx::Pool<sqlx::Sqlite>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("test.db").display()),
        max_connections: 5,
        connect_timeout_secs: 5,
        auto_migrate: true,
    };
    let pool = create_pool(&config).await.unwrap();
    (pool, dir)
}

pub fn test_server_crypto() -> ServerCrypto {
    let key = base64::engine::general_purpose::STANDARD.encode([0x5au8; 32]);
    ServerCrypto::new(&CryptoConfig { server_key_base64: key }).unwrap()
}

pub fn test_actor() -> UserId {
    UserId::new()
}

pub struct TestProject {
    pub project: ProjectRecord,
    pub keypair: ProjectKeyPair,
}

/// Create a project with a fresh key pair
pub async fn seed_project(
    pool: &sqlx::Pool<sqlx::Sqlite>,
    slug: &str,
    store_private_key: bool,
) -> TestProject {
    let keypair = crypto::generate_keypair().unwrap();
    let project = ProjectRepository::new(pool.clone())
        .create(CreateProjectRequest {
            workspace_id: WorkspaceId::new(),
            name: format!("Test project {}", slug),
            slug: slug.to_string(),
            public_key: keypair.public_key_pem.clone(),
            private_key: Some(keypair.private_key_pem.clone()),
            store_private_key,
        })
        .await
        .unwrap();
    TestProject { project, keypair }
}

pub async fn seed_environment(
    pool: &sqlx::Pool<sqlx::Sqlite>,
    project_id: &ProjectId,
    slug: &str,
) -> EnvironmentRecord {
    EnvironmentRepository::new(pool.clone())
        .create(CreateEnvironmentRequest {
            project_id: project_id.clone(),
            name: slug.to_uppercase(),
            slug: slug.to_string(),
        })
        .await
        .unwrap()
}

pub fn engine(pool: &sqlx::Pool<sqlx::Sqlite>) -> (ItemService, ChangeNotifier) {
    let notifier = ChangeNotifier::default();
    let service = ItemService::new(pool.clone(), notifier.clone(), Arc::new(AllowAll));
    (service, notifier)
}

pub struct IntegrationHarness {
    pub service: IntegrationService,
    pub integrations: IntegrationRepository,
    pub runs: IntegrationRunRepository,
    pub factory: IntegrationFactory,
    pub server_crypto: ServerCrypto,
}

/// Integration service wired against a mock HTTP endpoint. `base_url`
/// overrides the Slack and Vercel API bases and the Lambda endpoint.
pub fn integration_harness(
    pool: &sqlx::Pool<sqlx::Sqlite>,
    base_url: Option<&str>,
) -> IntegrationHarness {
    let server_crypto = test_server_crypto();
    let integrations = IntegrationRepository::new(pool.clone(), server_crypto.clone());
    let runs = IntegrationRunRepository::new(pool.clone());

    let mut deps = PluginDeps::new(runs.clone(), integrations.clone(), server_crypto.clone());
    if let Some(base) = base_url {
        deps.slack_api_base = base.to_string();
        deps.vercel_api_base = base.to_string();
        deps.lambda_clients =
            Arc::new(SdkLambdaClientFactory { endpoint_url: Some(base.to_string()) });
    }
    let factory = IntegrationFactory::new(deps);

    let service = IntegrationService::new(
        ProjectRepository::new(pool.clone()),
        EnvironmentRepository::new(pool.clone()),
        integrations.clone(),
        runs.clone(),
        AuditLogRepository::new(pool.clone()),
        factory.clone(),
        Arc::new(AllowAll),
    );
    IntegrationHarness { service, integrations, runs, factory, server_crypto }
}
