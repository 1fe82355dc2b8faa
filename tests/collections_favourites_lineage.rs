use std::collections::HashMap;

use metadata_catalog::domain::{ContainerType, ItemStatus, ItemType, TfrmType};
use metadata_catalog::events::RecordingEventPublisher;
use metadata_catalog::pagination::PaginationRequest;
use metadata_catalog::store::collections;
use metadata_catalog::store::favourites::{self, FavouriteTarget};
use metadata_catalog::store::items::{self, CreateItemInput, Limits};
use metadata_catalog::store::lineage;

fn limits() -> Limits {
    Limits {
        max_tags: 10,
        max_system_tags: 10,
        max_attribute_length: 100,
    }
}

fn file_input(name: &str, owner: &str) -> CreateItemInput {
    CreateItemInput {
        parent: None,
        parent_path: None,
        type_: ItemType::File,
        zone: 0,
        name: name.to_string(),
        size: 10,
        owner: Some(owner.to_string()),
        container_code: "proj1".into(),
        container_type: ContainerType::Project,
        location_uri: Some("s3://bucket/key".into()),
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

async fn activate(pool: &sqlx::PgPool, publisher: &RecordingEventPublisher, lims: &Limits, id: uuid::Uuid) {
    items::update_item(
        pool,
        publisher,
        lims,
        id,
        items::UpdateItemInput {
            status: Some(ItemStatus::Active),
            ..Default::default()
        },
    )
    .await
    .unwrap();
}

#[sqlx::test(migrations = "./migrations")]
async fn collection_create_enforces_cap_and_duplicate_names(pool: sqlx::PgPool) {
    collections::create(&pool, "first", "alice", "proj1", 1).await.unwrap();

    let over_cap = collections::create(&pool, "second", "alice", "proj1", 1).await.unwrap_err();
    assert_eq!(over_cap.status(), axum::http::StatusCode::BAD_REQUEST);

    let dup = collections::create(&pool, "first", "alice", "proj1", 10).await.unwrap_err();
    assert_eq!(dup.status(), axum::http::StatusCode::CONFLICT);
}

#[sqlx::test(migrations = "./migrations")]
async fn favouriting_an_item_does_not_require_ownership_but_a_collection_does(pool: sqlx::PgPool) {
    let publisher = RecordingEventPublisher::default();
    let lims = limits();

    let file = items::create_item(&pool, &publisher, &lims, file_input("report.csv", "alice")).await.unwrap();
    activate(&pool, &publisher, &lims, file.id).await;

    // bob favourites alice's item: allowed.
    let fav = favourites::create(&pool, "bob", FavouriteTarget::Item(file.id)).await.unwrap();
    assert_eq!(fav.pinned, false);

    let collection = collections::create(&pool, "alices-picks", "alice", "proj1", 10).await.unwrap();

    // bob favourites alice's collection: forbidden.
    let err = favourites::create(&pool, "bob", FavouriteTarget::Collection(collection.id)).await.unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);

    // alice favourites her own collection: allowed.
    favourites::create(&pool, "alice", FavouriteTarget::Collection(collection.id)).await.unwrap();

    let (rows, total) = favourites::list_for_user(&pool, "bob", &PaginationRequest::default()).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].item_id, Some(file.id));
}

#[sqlx::test(migrations = "./migrations")]
async fn copy_to_zone_create_records_lineage_and_provenance(pool: sqlx::PgPool) {
    let publisher = RecordingEventPublisher::default();
    let lims = limits();

    let source = items::create_item(&pool, &publisher, &lims, file_input("raw.csv", "alice")).await.unwrap();
    activate(&pool, &publisher, &lims, source.id).await;

    let mut copy_input = file_input("raw.csv", "alice");
    copy_input.zone = 1;
    copy_input.tfrm_type = Some(TfrmType::CopyToZone);
    copy_input.tfrm_source = Some(source.id);
    let copy = items::create_item(&pool, &publisher, &lims, copy_input).await.unwrap();

    let view = lineage::lineage_for_item(&pool, copy.id).await.unwrap();
    assert_eq!(view.lineage.len(), 1);
    let (_, row) = view.lineage.iter().next().unwrap();
    assert!(row.consumes.as_ref().unwrap().contains(&source.id));
    assert!(row.produces.as_ref().unwrap().contains(&copy.id));

    assert!(view.provenance.contains_key(&source.id));
    assert!(view.provenance.contains_key(&copy.id));
}
