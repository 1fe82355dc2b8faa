use std::collections::HashMap;

use metadata_catalog::domain::{ContainerType, ItemStatus, ItemType};
use metadata_catalog::events::RecordingEventPublisher;
use metadata_catalog::store::items::{self, CreateItemInput, Limits, UpdateItemInput};

fn limits() -> Limits {
    Limits {
        max_tags: 10,
        max_system_tags: 10,
        max_attribute_length: 100,
    }
}

fn root_folder(name: &str) -> CreateItemInput {
    CreateItemInput {
        parent: None,
        parent_path: None,
        type_: ItemType::Folder,
        zone: 0,
        name: name.to_string(),
        size: 0,
        owner: Some("alice".into()),
        container_code: "proj1".into(),
        container_type: ContainerType::Project,
        location_uri: None,
        version: None,
        upload_id: None,
        tags: vec![],
        system_tags: vec![],
        attribute_template_id: None,
        attributes: HashMap::new(),
        tfrm_type: None,
        tfrm_source: None,
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn folder_archive_then_restore_round_trips_to_active(pool: sqlx::PgPool) {
    let publisher = RecordingEventPublisher::default();
    let lims = limits();

    let folder = items::create_item(&pool, &publisher, &lims, root_folder("dataset-a")).await.unwrap();
    assert_eq!(folder.status, ItemStatus::Active);

    let mut child = root_folder("dataset-a");
    child.name = "file.csv".into();
    child.type_ = ItemType::File;
    child.parent = Some(folder.id);
    child.parent_path = Some("dataset-a".into());
    let file = items::create_item(&pool, &publisher, &lims, child).await.unwrap();
    assert_eq!(file.status, ItemStatus::Registered);

    // A REGISTERED item is locked: status must be set explicitly before
    // any other field can move.
    let err = items::update_item(
        &pool,
        &publisher,
        &lims,
        file.id,
        UpdateItemInput {
            name: Some("renamed.csv".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);

    let active = items::update_item(
        &pool,
        &publisher,
        &lims,
        file.id,
        UpdateItemInput {
            status: Some(ItemStatus::Active),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(active.status, ItemStatus::Active);

    let archived = items::archive_item(&pool, &publisher, folder.id).await.unwrap();
    assert_eq!(archived.status, ItemStatus::Archived);
    assert!(archived.parent_path.is_none());
    assert!(archived.restore_path.is_some());

    let restored = items::restore_item(&pool, &publisher, folder.id).await.unwrap();
    assert_eq!(restored.status, ItemStatus::Active);
    assert!(restored.restore_path.is_none());
    assert_eq!(restored.parent_path, folder.parent_path);

    // The child moved along with its parent's archive/restore round trip.
    let reloaded_file = items::get_by_id(&pool, file.id, None).await.unwrap();
    assert_eq!(reloaded_file.status, ItemStatus::Active);
    assert!(reloaded_file.parent_path.is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn create_rejects_name_folder_with_a_parent(pool: sqlx::PgPool) {
    let publisher = RecordingEventPublisher::default();
    let lims = limits();

    let mut input = root_folder("alice");
    input.type_ = ItemType::NameFolder;
    input.parent = Some(uuid::Uuid::new_v4());

    let err = items::create_item(&pool, &publisher, &lims, input).await.unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "./migrations")]
async fn hard_delete_removes_entire_subtree(pool: sqlx::PgPool) {
    let publisher = RecordingEventPublisher::default();
    let lims = limits();

    let folder = items::create_item(&pool, &publisher, &lims, root_folder("project-root")).await.unwrap();

    let mut child = root_folder("project-root");
    child.name = "nested".into();
    child.parent = Some(folder.id);
    child.parent_path = Some("project-root".into());
    let nested = items::create_item(&pool, &publisher, &lims, child).await.unwrap();

    items::delete_item(&pool, &publisher, folder.id).await.unwrap();

    let missing = items::get_by_id(&pool, folder.id, None).await;
    assert!(missing.is_err());
    let missing_child = items::get_by_id(&pool, nested.id, None).await;
    assert!(missing_child.is_err());

    // The deepest descendant is published before its ancestor.
    let records = publisher.records.lock().unwrap();
    let delete_records: Vec<_> = records.iter().filter(|r| r.to_delete).collect();
    assert_eq!(delete_records.len(), 2);
    assert_eq!(delete_records[0].id, nested.id);
    assert_eq!(delete_records[1].id, folder.id);
}
