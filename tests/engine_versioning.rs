//! Integration tests for version numbering: per-environment monotonic
//! numbering, cross-kind name uniqueness and empty-item edge cases.

mod common;

use common::{create_file_pool, create_test_pool, engine, seed_environment, seed_project, test_actor};
use vaultline::crypto;
use vaultline::domain::{ItemId, ItemKind};
use vaultline::services::{CreateItemRequest, EntryValue, UpdateItemRequest};
use vaultline::storage::{ConfigItemRepository, CreateItemRow, VersionOrder, VersionRepository};
use vaultline::VaultlineError;

fn create_request(kind: ItemKind, name: &str, entries: Vec<EntryValue>) -> CreateItemRequest {
    CreateItemRequest {
        kind,
        name: name.to_string(),
        slug: name.to_lowercase().replace(' ', "-"),
        note: None,
        rotate_after_hours: None,
        entries,
    }
}

fn entry(slug: &str, value: &str) -> EntryValue {
    EntryValue { environment_slug: slug.to_string(), value: value.to_string() }
}

#[tokio::test]
async fn test_create_starts_versions_at_one_per_environment() {
    let pool = create_test_pool().await;
    let seeded = seed_project(&pool, "proj", true).await;
    let dev = seed_environment(&pool, &seeded.project.project_id(), "dev").await;
    seed_environment(&pool, &seeded.project.project_id(), "prod").await;
    let (service, _) = engine(&pool);
    let actor = test_actor();

    let item = service
        .create(
            &actor,
            &seeded.project.project_id(),
            create_request(
                ItemKind::Secret,
                "DB_PASSWORD",
                vec![entry("dev", "hunter2"), entry("prod", "correct horse")],
            ),
        )
        .await
        .unwrap();

    let versions = VersionRepository::new(pool.clone());
    let dev_history = versions
        .list(&item.item_id(), &dev.environment_id(), VersionOrder::Asc, 0, 10)
        .await
        .unwrap();
    assert_eq!(dev_history.len(), 1);
    assert_eq!(dev_history[0].version, 1);

    // Stored value is ciphertext that decrypts to the supplied plaintext
    let plaintext =
        crypto::decrypt_asymmetric(&seeded.keypair.private_key_pem, &dev_history[0].value).unwrap();
    assert_eq!(plaintext, "hunter2");
}

#[tokio::test]
async fn test_update_numbers_environments_independently() {
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
            create_request(ItemKind::Variable, "LOG_LEVEL", vec![entry("dev", "debug")]),
        )
        .await
        .unwrap();

    // dev has one version, prod has none; one update entry per environment
    service
        .update(
            &actor,
            &item.item_id(),
            UpdateItemRequest {
                entries: vec![entry("dev", "trace"), entry("prod", "info")],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let versions = VersionRepository::new(pool.clone());
    let dev_history = versions
        .list(&item.item_id(), &dev.environment_id(), VersionOrder::Desc, 0, 10)
        .await
        .unwrap();
    let prod_history = versions
        .list(&item.item_id(), &prod.environment_id(), VersionOrder::Desc, 0, 10)
        .await
        .unwrap();

    assert_eq!(dev_history[0].version, 2);
    assert_eq!(prod_history[0].version, 1);
    // Variables are stored in the clear
    assert_eq!(dev_history[0].value, "trace");
}

#[tokio::test]
async fn test_concurrent_updates_never_reuse_version_numbers() {
    let (pool, _dir) = create_file_pool().await;
    let seeded = seed_project(&pool, "proj", true).await;
    let dev = seed_environment(&pool, &seeded.project.project_id(), "dev").await;
    let (service, _) = engine(&pool);
    let actor = test_actor();

    let item = service
        .create(
            &actor,
            &seeded.project.project_id(),
            create_request(ItemKind::Variable, "COUNTER", vec![entry("dev", "0")]),
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        let actor = actor.clone();
        let item_id = item.item_id();
        handles.push(tokio::spawn(async move {
            service
                .update(
                    &actor,
                    &item_id,
                    UpdateItemRequest {
                        entries: vec![entry("dev", &format!("{}", i))],
                        ..Default::default()
                    },
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let versions = VersionRepository::new(pool.clone());
    let history = versions
        .list(&item.item_id(), &dev.environment_id(), VersionOrder::Asc, 0, 100)
        .await
        .unwrap();
    let numbers: Vec<i64> = history.iter().map(|v| v.version).collect();
    assert_eq!(numbers, (1..=9).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_name_collides_across_kinds() {
    let pool = create_test_pool().await;
    let seeded = seed_project(&pool, "proj", true).await;
    let (service, _) = engine(&pool);
    let actor = test_actor();

    service
        .create(
            &actor,
            &seeded.project.project_id(),
            create_request(ItemKind::Secret, "Secret 1", vec![]),
        )
        .await
        .unwrap();

    // Same name as a variable must also collide
    let err = service
        .create(
            &actor,
            &seeded.project.project_id(),
            create_request(ItemKind::Variable, "Secret 1", vec![]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 409);
    assert!(err.to_string().contains("already exists"));
    assert!(matches!(err, VaultlineError::Conflict { .. }));
}

#[tokio::test]
async fn test_concurrent_create_loser_gets_conflict_from_unique_index() {
    let pool = create_test_pool().await;
    let seeded = seed_project(&pool, "proj", true).await;
    let repo = ConfigItemRepository::new(pool.clone());
    let actor = test_actor();

    let row = || CreateItemRow {
        id: ItemId::new(),
        project_id: seeded.project.project_id(),
        kind: ItemKind::Secret,
        name: "API_KEY".to_string(),
        slug: "api_key".to_string(),
        note: None,
        rotate_after_hours: None,
        next_rotation_at: None,
        author: actor.clone(),
    };

    let mut tx = pool.begin().await.unwrap();
    repo.insert(&mut tx, &row()).await.unwrap();
    tx.commit().await.unwrap();

    // A writer that slipped past the service's name check hits the
    // UNIQUE(project_id, name) index and must still see a 409, not an
    // opaque database failure
    let mut tx = pool.begin().await.unwrap();
    let err = repo.insert(&mut tx, &row()).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert!(err.to_string().contains("already exists in this project"));
}

#[tokio::test]
async fn test_zero_entries_creates_zero_versions() {
    let pool = create_test_pool().await;
    let seeded = seed_project(&pool, "proj", true).await;
    let dev = seed_environment(&pool, &seeded.project.project_id(), "dev").await;
    let (service, _) = engine(&pool);
    let actor = test_actor();

    let item = service
        .create(
            &actor,
            &seeded.project.project_id(),
            create_request(ItemKind::Secret, "EMPTY", vec![]),
        )
        .await
        .unwrap();

    let versions = VersionRepository::new(pool.clone());
    let history = versions
        .list(&item.item_id(), &dev.environment_id(), VersionOrder::Asc, 0, 10)
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_create_rejects_unknown_environment() {
    let pool = create_test_pool().await;
    let seeded = seed_project(&pool, "proj", true).await;
    let (service, _) = engine(&pool);
    let actor = test_actor();

    let err = service
        .create(
            &actor,
            &seeded.project.project_id(),
            create_request(ItemKind::Secret, "KEY", vec![entry("staging", "v")]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_rename_keeps_versions_and_rejects_collision() {
    let pool = create_test_pool().await;
    let seeded = seed_project(&pool, "proj", true).await;
    seed_environment(&pool, &seeded.project.project_id(), "dev").await;
    let (service, _) = engine(&pool);
    let actor = test_actor();

    let item = service
        .create(
            &actor,
            &seeded.project.project_id(),
            create_request(ItemKind::Variable, "OLD_NAME", vec![entry("dev", "v")]),
        )
        .await
        .unwrap();
    service
        .create(
            &actor,
            &seeded.project.project_id(),
            create_request(ItemKind::Variable, "TAKEN", vec![]),
        )
        .await
        .unwrap();

    let renamed = service
        .update(
            &actor,
            &item.item_id(),
            UpdateItemRequest { name: Some("NEW_NAME".to_string()), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name, "NEW_NAME");

    let err = service
        .update(
            &actor,
            &item.item_id(),
            UpdateItemRequest { name: Some("TAKEN".to_string()), ..Default::default() },
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}
