//! Integration tests for project listing: latest-version collapse, search
//! filtering and the decrypt guards.

mod common;

use common::{create_test_pool, engine, seed_environment, seed_project, test_actor};
use vaultline::domain::ItemKind;
use vaultline::services::{CreateItemRequest, EntryValue, ListItemsRequest, UpdateItemRequest};
use vaultline::storage::{CreateProjectRequest, ProjectRepository};

fn entry(slug: &str, value: &str) -> EntryValue {
    EntryValue { environment_slug: slug.to_string(), value: value.to_string() }
}

fn create_request(kind: ItemKind, name: &str, entries: Vec<EntryValue>) -> CreateItemRequest {
    CreateItemRequest {
        kind,
        name: name.to_string(),
        slug: name.to_lowercase().replace('_', "-"),
        note: None,
        rotate_after_hours: None,
        entries,
    }
}

#[tokio::test]
async fn test_listing_collapses_to_latest_version_per_environment() {
    let pool = create_test_pool().await;
    let seeded = seed_project(&pool, "proj", true).await;
    let dev = seed_environment(&pool, &seeded.project.project_id(), "dev").await;
    let prod = seed_environment(&pool, &seeded.project.project_id(), "prod").await;
    let (service, _) = engine(&pool);
    let actor = test_actor();

    let item = service
        .create(
            &actor,
            &seeded.project.project_id(),
            create_request(
                ItemKind::Secret,
                "API_KEY",
                vec![entry("dev", "dev-1"), entry("prod", "prod-1")],
            ),
        )
        .await
        .unwrap();
    service
        .update(
            &actor,
            &item.item_id(),
            UpdateItemRequest { entries: vec![entry("dev", "dev-2")], ..Default::default() },
        )
        .await
        .unwrap();

    let listed = service
        .list_for_project(
            &actor,
            &seeded.project.project_id(),
            ListItemsRequest { decrypt: true, limit: 10, ..Default::default() },
        )
        .await
        .unwrap();

    assert_eq!(listed.len(), 1);
    let values = &listed[0].values;
    assert_eq!(values.len(), 2);

    let dev_value = values.iter().find(|v| v.environment_id == dev.environment_id()).unwrap();
    assert_eq!(dev_value.version, 2);
    assert_eq!(dev_value.value, "dev-2");
    let prod_value = values.iter().find(|v| v.environment_id == prod.environment_id()).unwrap();
    assert_eq!(prod_value.version, 1);
    assert_eq!(prod_value.value, "prod-1");
}

#[tokio::test]
async fn test_decrypt_guard_when_key_not_stored() {
    let pool = create_test_pool().await;
    let seeded = seed_project(&pool, "proj", false).await;
    let (service, _) = engine(&pool);
    let actor = test_actor();

    let err = service
        .list_for_project(
            &actor,
            &seeded.project.project_id(),
            ListItemsRequest { decrypt: true, limit: 10, ..Default::default() },
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 400);
    assert!(err
        .to_string()
        .contains("Cannot decrypt secret values as the project does not store the private key"));
}

#[tokio::test]
async fn test_decrypt_guard_when_promised_key_is_absent() {
    let pool = create_test_pool().await;
    // The row claims to store its key but the field is empty
    let project = ProjectRepository::new(pool.clone())
        .create(CreateProjectRequest {
            workspace_id: vaultline::domain::WorkspaceId::new(),
            name: "Broken".to_string(),
            slug: "broken".to_string(),
            public_key: "unused".to_string(),
            private_key: None,
            store_private_key: true,
        })
        .await
        .unwrap();
    let (service, _) = engine(&pool);
    let actor = test_actor();

    let err = service
        .list_for_project(
            &actor,
            &project.project_id(),
            ListItemsRequest { decrypt: true, limit: 10, ..Default::default() },
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 404);
    assert!(err.to_string().contains("does not have a private key"));
}

#[tokio::test]
async fn test_listing_without_decrypt_returns_ciphertext() {
    let pool = create_test_pool().await;
    let seeded = seed_project(&pool, "proj", false).await;
    seed_environment(&pool, &seeded.project.project_id(), "dev").await;
    let (service, _) = engine(&pool);
    let actor = test_actor();

    service
        .create(
            &actor,
            &seeded.project.project_id(),
            create_request(ItemKind::Secret, "KEY", vec![entry("dev", "plain")]),
        )
        .await
        .unwrap();

    let listed = service
        .list_for_project(
            &actor,
            &seeded.project.project_id(),
            ListItemsRequest { limit: 10, ..Default::default() },
        )
        .await
        .unwrap();
    assert_ne!(listed[0].values[0].value, "plain");
}

#[tokio::test]
async fn test_listing_filters_by_kind_and_search() {
    let pool = create_test_pool().await;
    let seeded = seed_project(&pool, "proj", true).await;
    let (service, _) = engine(&pool);
    let actor = test_actor();

    for (kind, name) in [
        (ItemKind::Secret, "DB_PASSWORD"),
        (ItemKind::Secret, "API_TOKEN"),
        (ItemKind::Variable, "DB_HOST"),
    ] {
        service
            .create(&actor, &seeded.project.project_id(), create_request(kind, name, vec![]))
            .await
            .unwrap();
    }

    let secrets = service
        .list_for_project(
            &actor,
            &seeded.project.project_id(),
            ListItemsRequest { kind: Some(ItemKind::Secret), limit: 10, ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(secrets.len(), 2);

    let matched = service
        .list_for_project(
            &actor,
            &seeded.project.project_id(),
            ListItemsRequest { search: Some("db".to_string()), limit: 10, ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(matched.len(), 2);
}

#[tokio::test]
async fn test_delete_removes_item_and_versions() {
    let pool = create_test_pool().await;
    let seeded = seed_project(&pool, "proj", true).await;
    seed_environment(&pool, &seeded.project.project_id(), "dev").await;
    let (service, _) = engine(&pool);
    let actor = test_actor();

    let item = service
        .create(
            &actor,
            &seeded.project.project_id(),
            create_request(ItemKind::Secret, "DOOMED", vec![entry("dev", "v")]),
        )
        .await
        .unwrap();

    service.delete(&actor, &item.item_id()).await.unwrap();

    let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM item_versions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining.0, 0);

    let listed = service
        .list_for_project(
            &actor,
            &seeded.project.project_id(),
            ListItemsRequest { limit: 10, ..Default::default() },
        )
        .await
        .unwrap();
    assert!(listed.is_empty());
}
