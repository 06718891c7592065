//! Sync-class integration tests: Vercel and AWS Lambda value forwarding with
//! externally stored private keys, environment-deletion cleanup and the
//! reconciler's retry of parked cleanup actions.

mod common;

use common::*;
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vaultline::crypto;
use vaultline::domain::{EventId, EventType, WorkspaceId};
use vaultline::integrations::{
    ChangeEvent, CreateIntegrationRequest, EventEntry, IntegrationType, Reconciler,
};

#[tokio::test]
async fn vercel_decrypts_with_external_key_and_upserts() {
    let pool = create_test_pool().await;
    let project = seed_project(&pool, "acme", true).await;
    let env = seed_environment(&pool, &project.project.project_id(), "dev").await;
    let server = MockServer::start().await;

    let harness = integration_harness(&pool, Some(&server.uri()));
    let wrapped_key =
        harness.server_crypto.encrypt(&project.keypair.private_key_pem).unwrap();

    Mock::given(method("GET"))
        .and(path("/v9/projects/prj_1/env"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "envs": [
                { "id": "ev_key", "key": "VAULTLINE_PRIVATE_KEY", "value": wrapped_key },
            ],
        })))
        .mount(&server)
        .await;
    // The plaintext must reach Vercel decrypted, targeted at the mapped
    // system environment
    Mock::given(method("POST"))
        .and(path("/v10/projects/prj_1/env"))
        .and(body_partial_json(json!({
            "key": "API_KEY",
            "value": "hunter2",
            "target": ["production"],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v10/projects/prj_1/env"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let actor = test_actor();
    let record = harness
        .service
        .create(
            &actor,
            CreateIntegrationRequest {
                workspace_id: WorkspaceId::from_string(project.project.workspace_id.clone()),
                name: "Vercel sync".to_string(),
                integration_type: IntegrationType::Vercel,
                project_slug: Some("acme".to_string()),
                private_key: None,
                environment_slugs: vec!["dev".to_string()],
                notify_on: vec![EventType::SecretAdded, EventType::SecretDeleted],
                metadata: json!({
                    "token": "tok",
                    "projectId": "prj_1",
                    "environments": { (env.id.clone()): { "systemEnvironment": "production" } },
                }),
            },
        )
        .await
        .unwrap();

    let runs = harness.service.list_runs(&record.id, 0, 50).await.unwrap();
    assert!(runs
        .iter()
        .any(|r| r.title == "Initializing Vercel integration" && r.status == "success"));

    let ciphertext =
        crypto::encrypt_asymmetric(&project.project.public_key, "hunter2").unwrap();
    harness
        .service
        .dispatch_event(&ChangeEvent {
            event_id: EventId::new(),
            event_type: EventType::SecretAdded,
            workspace_id: WorkspaceId::from_string(project.project.workspace_id.clone()),
            project_id: Some(project.project.project_id()),
            item_name: Some("API_KEY".to_string()),
            previous_name: None,
            entries: vec![EventEntry {
                environment_id: env.environment_id(),
                value: ciphertext,
                is_ciphertext: true,
            }],
            title: "Secret added".to_string(),
        })
        .await;

    let runs = harness.service.list_runs(&record.id, 0, 50).await.unwrap();
    assert!(runs
        .iter()
        .any(|r| r.title == "Syncing environment variables to Vercel"
            && r.status == "success"));
}

#[tokio::test]
async fn vercel_deletes_variable_on_secret_deleted() {
    let pool = create_test_pool().await;
    let project = seed_project(&pool, "acme", true).await;
    let env = seed_environment(&pool, &project.project.project_id(), "dev").await;
    let server = MockServer::start().await;

    let harness = integration_harness(&pool, Some(&server.uri()));
    let wrapped_key =
        harness.server_crypto.encrypt(&project.keypair.private_key_pem).unwrap();

    Mock::given(method("GET"))
        .and(path("/v9/projects/prj_1/env"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "envs": [
                { "id": "ev_key", "key": "VAULTLINE_PRIVATE_KEY", "value": wrapped_key },
                { "id": "ev_api", "key": "API_KEY", "value": "hunter2" },
            ],
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v10/projects/prj_1/env"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v9/projects/prj_1/env/ev_api"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let actor = test_actor();
    let record = harness
        .service
        .create(
            &actor,
            CreateIntegrationRequest {
                workspace_id: WorkspaceId::from_string(project.project.workspace_id.clone()),
                name: "Vercel sync".to_string(),
                integration_type: IntegrationType::Vercel,
                project_slug: Some("acme".to_string()),
                private_key: None,
                environment_slugs: vec!["dev".to_string()],
                notify_on: vec![EventType::SecretDeleted],
                metadata: json!({
                    "token": "tok",
                    "projectId": "prj_1",
                    "environments": { (env.id.clone()): { "systemEnvironment": "production" } },
                }),
            },
        )
        .await
        .unwrap();

    harness
        .service
        .dispatch_event(&ChangeEvent {
            event_id: EventId::new(),
            event_type: EventType::SecretDeleted,
            workspace_id: WorkspaceId::from_string(project.project.workspace_id.clone()),
            project_id: Some(project.project.project_id()),
            item_name: Some("API_KEY".to_string()),
            previous_name: None,
            entries: vec![EventEntry {
                environment_id: env.environment_id(),
                value: String::new(),
                is_ciphertext: false,
            }],
            title: "Secret deleted".to_string(),
        })
        .await;

    let runs = harness.service.list_runs(&record.id, 0, 50).await.unwrap();
    assert!(runs
        .iter()
        .any(|r| r.title == "Removing environment variables from Vercel"
            && r.status == "success"));
}

#[tokio::test]
async fn deleting_vercel_integration_removes_installed_private_key() {
    let pool = create_test_pool().await;
    let project = seed_project(&pool, "acme", true).await;
    let env = seed_environment(&pool, &project.project.project_id(), "dev").await;
    let server = MockServer::start().await;

    let harness = integration_harness(&pool, Some(&server.uri()));
    let wrapped_key =
        harness.server_crypto.encrypt(&project.keypair.private_key_pem).unwrap();

    Mock::given(method("GET"))
        .and(path("/v9/projects/prj_1/env"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "envs": [
                { "id": "ev_key", "key": "VAULTLINE_PRIVATE_KEY", "value": wrapped_key },
                { "id": "ev_api", "key": "API_KEY", "value": "hunter2" },
            ],
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v10/projects/prj_1/env"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;
    // Only the pushed private key variable may be removed on delete
    Mock::given(method("DELETE"))
        .and(path("/v9/projects/prj_1/env/ev_key"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let actor = test_actor();
    let workspace = WorkspaceId::from_string(project.project.workspace_id.clone());
    let record = harness
        .service
        .create(
            &actor,
            CreateIntegrationRequest {
                workspace_id: workspace.clone(),
                name: "Vercel sync".to_string(),
                integration_type: IntegrationType::Vercel,
                project_slug: Some("acme".to_string()),
                private_key: None,
                environment_slugs: vec!["dev".to_string()],
                notify_on: vec![EventType::SecretAdded],
                metadata: json!({
                    "token": "tok",
                    "projectId": "prj_1",
                    "environments": { (env.id.clone()): { "systemEnvironment": "production" } },
                }),
            },
        )
        .await
        .unwrap();

    harness.service.delete(&actor, &record.id).await.unwrap();

    let remaining = harness.integrations.list_by_workspace(&workspace, 0, 50).await.unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn lambda_environment_deleted_removes_key_and_disconnects() {
    let pool = create_test_pool().await;
    let project = seed_project(&pool, "acme", true).await;
    let env = seed_environment(&pool, &project.project.project_id(), "dev").await;
    let server = MockServer::start().await;

    let harness = integration_harness(&pool, Some(&server.uri()));
    let wrapped_key =
        harness.server_crypto.encrypt(&project.keypair.private_key_pem).unwrap();

    Mock::given(method("GET"))
        .and(path("/2015-03-31/functions/fn/configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "FunctionName": "fn",
            "Environment": { "Variables": { "VAULTLINE_PRIVATE_KEY": wrapped_key } },
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/2015-03-31/functions/fn/configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "FunctionName": "fn" })))
        .mount(&server)
        .await;

    let actor = test_actor();
    let record = harness
        .service
        .create(
            &actor,
            CreateIntegrationRequest {
                workspace_id: WorkspaceId::from_string(project.project.workspace_id.clone()),
                name: "Lambda sync".to_string(),
                integration_type: IntegrationType::AwsLambda,
                project_slug: Some("acme".to_string()),
                private_key: None,
                environment_slugs: vec!["dev".to_string()],
                notify_on: vec![EventType::EnvironmentUpdated, EventType::EnvironmentDeleted],
                metadata: json!({
                    "lambdaFunctionName": "fn",
                    "region": "us-east-1",
                    "accessKeyId": "AKIA",
                    "secretAccessKey": "shh",
                }),
            },
        )
        .await
        .unwrap();
    assert_eq!(record.environment_ids, vec![env.environment_id()]);

    harness
        .service
        .dispatch_event(&ChangeEvent {
            event_id: EventId::new(),
            event_type: EventType::EnvironmentDeleted,
            workspace_id: WorkspaceId::from_string(project.project.workspace_id.clone()),
            project_id: Some(project.project.project_id()),
            item_name: None,
            previous_name: None,
            entries: vec![EventEntry {
                environment_id: env.environment_id(),
                value: String::new(),
                is_ciphertext: false,
            }],
            title: "Environment deleted".to_string(),
        })
        .await;

    let runs = harness.service.list_runs(&record.id, 0, 50).await.unwrap();
    assert!(runs
        .iter()
        .any(|r| r.title == "Removing AWS Lambda environment variables"
            && r.status == "success"));

    // The deleted environment is detached from the integration
    let reloaded = harness.integrations.get_by_id(&record.id).await.unwrap();
    assert!(reloaded.environment_ids.is_empty());
}

#[tokio::test]
async fn lambda_ignores_environment_update_without_entries() {
    let pool = create_test_pool().await;
    let project = seed_project(&pool, "acme", true).await;
    seed_environment(&pool, &project.project.project_id(), "dev").await;
    let server = MockServer::start().await;

    let harness = integration_harness(&pool, Some(&server.uri()));

    Mock::given(method("GET"))
        .and(path("/2015-03-31/functions/fn/configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "FunctionName": "fn",
            "Environment": { "Variables": {} },
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/2015-03-31/functions/fn/configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "FunctionName": "fn" })))
        .mount(&server)
        .await;

    let actor = test_actor();
    let record = harness
        .service
        .create(
            &actor,
            CreateIntegrationRequest {
                workspace_id: WorkspaceId::from_string(project.project.workspace_id.clone()),
                name: "Lambda sync".to_string(),
                integration_type: IntegrationType::AwsLambda,
                project_slug: Some("acme".to_string()),
                private_key: None,
                environment_slugs: vec!["dev".to_string()],
                notify_on: vec![EventType::EnvironmentUpdated],
                metadata: json!({
                    "lambdaFunctionName": "fn",
                    "region": "us-east-1",
                    "accessKeyId": "AKIA",
                    "secretAccessKey": "shh",
                }),
            },
        )
        .await
        .unwrap();
    let baseline = harness.service.list_runs(&record.id, 0, 50).await.unwrap().len();

    // A rename carries no values, so nothing is forwarded
    harness
        .service
        .dispatch_event(&ChangeEvent {
            event_id: EventId::new(),
            event_type: EventType::EnvironmentUpdated,
            workspace_id: WorkspaceId::from_string(project.project.workspace_id.clone()),
            project_id: Some(project.project.project_id()),
            item_name: None,
            previous_name: None,
            entries: vec![],
            title: "Environment renamed".to_string(),
        })
        .await;

    let runs = harness.service.list_runs(&record.id, 0, 50).await.unwrap();
    assert_eq!(runs.len(), baseline);
}

#[tokio::test]
async fn reconciler_replays_parked_cleanup() {
    let pool = create_test_pool().await;
    let project = seed_project(&pool, "acme", true).await;
    let env = seed_environment(&pool, &project.project.project_id(), "dev").await;
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;
    // First post is the init message, second is the failing delete
    // notification, third is the reconciler's successful retry
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let harness = integration_harness(&pool, Some(&server.uri()));
    let actor = test_actor();

    let record = harness
        .service
        .create(
            &actor,
            CreateIntegrationRequest {
                workspace_id: WorkspaceId::from_string(project.project.workspace_id.clone()),
                name: "Discord alerts".to_string(),
                integration_type: IntegrationType::Discord,
                project_slug: Some("acme".to_string()),
                private_key: None,
                environment_slugs: vec![],
                notify_on: vec![EventType::SecretDeleted],
                metadata: json!({ "webhookUrl": format!("{}/webhook", server.uri()) }),
            },
        )
        .await
        .unwrap();

    harness
        .service
        .dispatch_event(&ChangeEvent {
            event_id: EventId::new(),
            event_type: EventType::SecretDeleted,
            workspace_id: WorkspaceId::from_string(project.project.workspace_id.clone()),
            project_id: Some(project.project.project_id()),
            item_name: Some("API_KEY".to_string()),
            previous_name: None,
            entries: vec![EventEntry {
                environment_id: env.environment_id(),
                value: String::new(),
                is_ciphertext: false,
            }],
            title: "Secret deleted".to_string(),
        })
        .await;

    // The failed delivery is parked in metadata for retry
    let parked = harness.integrations.get_by_id(&record.id).await.unwrap();
    let pending = parked.metadata["pendingCleanup"].as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["action"], "SECRET_DELETED");
    assert_eq!(pending[0]["name"], "API_KEY");
    assert_eq!(pending[0]["environmentId"], env.id);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Reconciler::new(
        harness.integrations.clone(),
        harness.factory.clone(),
        Duration::from_secs(3600),
        shutdown_rx,
    );
    reconciler.run_once().await;

    let reconciled = harness.integrations.get_by_id(&record.id).await.unwrap();
    assert!(reconciled.metadata.get("pendingCleanup").is_none());

    let runs = harness.service.list_runs(&record.id, 0, 50).await.unwrap();
    // init, failed delete post, successful retry
    assert_eq!(runs.len(), 3);
    assert_eq!(runs.iter().filter(|r| r.status == "failed").count(), 1);
}
