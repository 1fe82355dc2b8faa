//! The item store (C2): lookups, create/update, and the subtree
//! mutations (move, rename, archive, restore, delete, bequeath) that
//! keep `parent`/`parent_path`/`restore_path` consistent across an
//! entire subtree. Grounded on `app/routers/v1/items/crud_items.py` and
//! `app/routers/v1/items/utils.py`.

use std::collections::{HashMap, HashSet};

use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::domain::{
    self, AttributeMap, AttributeTemplateRow, ContainerType, ExtendedRow, ItemResponse, ItemRow, ItemStatus, ItemType,
    LabelPath, StorageRow, TfrmType,
};
use crate::error::ApiError;
use crate::events::{EventPublisher, ItemEventRecord};
use crate::pagination::PaginationRequest;
use crate::path_codec;

/// Cardinality/length caps from `Config`, threaded through so the store
/// never reaches into global state.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_tags: usize,
    pub max_system_tags: usize,
    pub max_attribute_length: usize,
}

/// The payload accepted by `POST /v1/item/`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateItemInput {
    pub parent: Option<Uuid>,
    /// Raw (un-encoded) `/`-separated path, or absent for a root item.
    pub parent_path: Option<String>,
    #[serde(rename = "type")]
    pub type_: ItemType,
    pub zone: i32,
    pub name: String,
    #[serde(default)]
    pub size: i64,
    pub owner: Option<String>,
    pub container_code: String,
    pub container_type: ContainerType,
    #[serde(default)]
    pub location_uri: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub system_tags: Vec<String>,
    #[serde(default)]
    pub attribute_template_id: Option<Uuid>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// When set, this create also records a lineage row: `copy_to_zone`
    /// consumes `tfrm_source` and produces the new item.
    #[serde(default)]
    pub tfrm_type: Option<TfrmType>,
    #[serde(default)]
    pub tfrm_source: Option<Uuid>,
}

/// The payload accepted by `PUT /v1/item/?id=`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UpdateItemInput {
    #[serde(default)]
    pub status: Option<ItemStatus>,
    #[serde(default)]
    pub parent: Option<Uuid>,
    #[serde(default)]
    pub parent_path: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub location_uri: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub system_tags: Option<Vec<String>>,
    #[serde(default)]
    pub attribute_template_id: Option<Uuid>,
    #[serde(default)]
    pub attributes: Option<HashMap<String, String>>,
}

/// Filters accepted by `GET /v1/items/search/`, beyond the permission
/// filter layered on top by C3.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ItemSearchFilter {
    pub status: Option<ItemStatus>,
    pub zone: Option<i32>,
    pub name: Option<String>,
    pub owner: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<ItemType>,
    pub container_code: Option<String>,
    pub container_type: Option<ContainerType>,
    pub parent_path: Option<String>,
    pub restore_path: Option<String>,
    #[serde(default)]
    pub recursive: bool,
    pub updated_after: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_before: Option<chrono::DateTime<chrono::Utc>>,
    /// When set, the search also reports this user's favourite flag on
    /// each result rather than a blanket `false`.
    pub fav_user: Option<String>,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub order_desc: bool,
}

const SORTABLE_COLUMNS: &[&str] = &[
    "name",
    "size",
    "owner",
    "created_time",
    "last_updated_time",
    "zone",
    "status",
];

fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

fn segments(path: &LabelPath) -> Vec<&str> {
    path.as_str().split('.').filter(|s| !s.is_empty()).collect()
}

fn path_from_segments(segs: &[&str]) -> LabelPath {
    LabelPath(segs.join("."))
}

fn child_path(parent: Option<&LabelPath>, own_label: &str) -> LabelPath {
    match parent {
        Some(p) if !p.as_str().is_empty() => LabelPath(format!("{}.{own_label}", p.as_str())),
        _ => LabelPath(own_label.to_string()),
    }
}

/// Splits `restore_path`/`parent_path` into `(prefix, trailing label)` so
/// the caller can look up the node that *owns* that path.
fn split_trailing(path: &LabelPath) -> (Option<LabelPath>, Option<String>) {
    let segs = segments(path);
    match segs.split_last() {
        None => (None, None),
        Some((last, rest)) => {
            let prefix = if rest.is_empty() { None } else { Some(path_from_segments(rest)) };
            (prefix, Some(last.to_string()))
        }
    }
}

// ---------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------

async fn fetch_item_row(pool: &PgPool, id: Uuid) -> Result<Option<ItemRow>, ApiError> {
    let row = sqlx::query_as::<_, ItemRow>(
        r#"select id, parent, parent_path, restore_path, status, type, zone, name, size,
                  owner, container_code, container_type, deleted, deleted_by, deleted_at,
                  created_time, last_updated_time
           from metadata.items where id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

async fn fetch_storage_row(pool: &PgPool, id: Uuid) -> Result<StorageRow, ApiError> {
    sqlx::query_as::<_, StorageRow>("select item_id, location_uri, version, upload_id from metadata.storage where item_id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(ApiError::from)
}

async fn fetch_extended_row(pool: &PgPool, id: Uuid) -> Result<ExtendedRow, ApiError> {
    sqlx::query_as::<_, ExtendedRow>(
        "select item_id, tags, system_tags, attributes from metadata.extended where item_id = $1",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(ApiError::from)
}

/// Resolves the `(template_id, template_name)` pair attached to a
/// non-empty attributes map, the way the event publisher's normalized
/// record does.
async fn resolve_template_name(pool: &PgPool, attributes: &AttributeMap) -> Result<(Option<Uuid>, Option<String>), ApiError> {
    let Some(template_id) = crate::events::resolve_template_ref(attributes) else {
        return Ok((None, None));
    };
    let name = sqlx::query_scalar::<_, String>("select name from metadata.attribute_templates where id = $1")
        .bind(template_id)
        .fetch_optional(pool)
        .await?;
    Ok((Some(template_id), name))
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn get_by_id(pool: &PgPool, id: Uuid, favourite_user: Option<&str>) -> Result<ItemResponse, ApiError> {
    let item = fetch_item_row(pool, id)
        .await?
        .ok_or_else(|| ApiError::EntityNotFound(format!("item {id} not found")))?;
    assemble(pool, item, favourite_user).await
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn get_by_location(
    pool: &PgPool,
    name: &str,
    parent_path: Option<&str>,
    container_code: &str,
    container_type: ContainerType,
    zone: i32,
    status: ItemStatus,
) -> Result<ItemResponse, ApiError> {
    let encoded_parent = parent_path.map(LabelPath::encode);
    let item = sqlx::query_as::<_, ItemRow>(
        r#"select id, parent, parent_path, restore_path, status, type, zone, name, size,
                  owner, container_code, container_type, deleted, deleted_by, deleted_at,
                  created_time, last_updated_time
           from metadata.items
           where name = $1 and container_code = $2 and container_type = $3
             and zone = $4 and status = $5
             and parent_path is not distinct from $6"#,
    )
    .bind(name)
    .bind(container_code)
    .bind(container_type)
    .bind(zone)
    .bind(status)
    .bind(encoded_parent.as_ref().map(|p| p.as_str()))
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::EntityNotFound(format!("no item named {name} at that location")))?;
    assemble(pool, item, None).await
}

#[tracing::instrument(skip(pool, ids), err(Debug))]
pub async fn get_by_ids(pool: &PgPool, ids: &[Uuid], favourite_user: Option<&str>) -> Result<Vec<ItemResponse>, ApiError> {
    let rows = sqlx::query_as::<_, ItemRow>(
        r#"select id, parent, parent_path, restore_path, status, type, zone, name, size,
                  owner, container_code, container_type, deleted, deleted_by, deleted_at,
                  created_time, last_updated_time
           from metadata.items where id = any($1)"#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(assemble(pool, row, favourite_user).await?);
    }
    Ok(out)
}

async fn assemble(pool: &PgPool, item: ItemRow, favourite_user: Option<&str>) -> Result<ItemResponse, ApiError> {
    let storage = fetch_storage_row(pool, item.id).await?;
    let extended = fetch_extended_row(pool, item.id).await?;
    let favourite = match favourite_user {
        Some(user) => {
            sqlx::query_scalar::<_, bool>(
                r#"select exists(select 1 from metadata.favourites where "user" = $1 and item_id = $2)"#,
            )
            .bind(user)
            .bind(item.id)
            .fetch_one(pool)
            .await?
        }
        None => false,
    };
    let (template_id, template_name) = resolve_template_name(pool, &extended.attributes.0).await?;
    let mut response = domain::combine_item(item, storage, extended, favourite);
    response.extended.template_id = template_id;
    response.extended.template_name = template_name;
    Ok(response)
}

/// Paginated, filtered item listing. `permission_clause`, when present,
/// is ANDed into the query by C3's permission filter -- this function
/// never constructs a second query.
#[tracing::instrument(skip(pool, filter, permission_clause), err(Debug))]
pub async fn search(
    pool: &PgPool,
    filter: &ItemSearchFilter,
    permission_clause: Option<&str>,
    page: &PaginationRequest,
) -> Result<(Vec<ItemResponse>, i64), ApiError> {
    let sort_by = match &filter.sort_by {
        Some(col) if SORTABLE_COLUMNS.contains(&col.as_str()) => col.as_str(),
        Some(other) => return Err(ApiError::BadRequest(format!("unsupported sort key: {other}"))),
        None => "created_time",
    };

    let mut count_builder: QueryBuilder<Postgres> = QueryBuilder::new("select count(*) from metadata.items where 1=1");
    push_filter(&mut count_builder, filter, permission_clause)?;
    let total: i64 = count_builder.build_query_scalar().fetch_one(pool).await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        r#"select id, parent, parent_path, restore_path, status, type, zone, name, size,
                  owner, container_code, container_type, deleted, deleted_by, deleted_at,
                  created_time, last_updated_time
           from metadata.items where 1=1"#,
    );
    push_filter(&mut builder, filter, permission_clause)?;
    builder.push(" order by (type = 'name_folder') desc, (type = 'folder') desc, ");
    builder.push(sort_by);
    builder.push(if filter.order_desc { " desc" } else { " asc" });
    builder.push(" limit ").push_bind(page.limit()).push(" offset ").push_bind(page.offset());

    let rows = builder.build_query_as::<ItemRow>().fetch_all(pool).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(assemble(pool, row, filter.fav_user.as_deref()).await?);
    }
    Ok((out, total))
}

fn push_filter<'a>(
    builder: &mut QueryBuilder<'a, Postgres>,
    filter: &'a ItemSearchFilter,
    permission_clause: Option<&'a str>,
) -> Result<(), ApiError> {
    if let Some(status) = filter.status {
        builder.push(" and status = ").push_bind(status);
    }
    if let Some(zone) = filter.zone {
        builder.push(" and zone = ").push_bind(zone);
    }
    if let Some(name) = &filter.name {
        builder.push(" and name ilike ").push_bind(format!("%{name}%"));
    }
    if let Some(owner) = &filter.owner {
        builder.push(" and owner = ").push_bind(owner);
    }
    if let Some(type_) = filter.type_ {
        builder.push(" and type = ").push_bind(type_);
    }
    if let Some(code) = &filter.container_code {
        builder.push(" and container_code = ").push_bind(code);
    }
    if let Some(container_type) = filter.container_type {
        builder.push(" and container_type = ").push_bind(container_type);
    }
    if let Some(raw) = &filter.parent_path {
        let encoded = LabelPath::encode(raw);
        if filter.recursive {
            builder.push(" and parent_path <@ ").push_bind(encoded);
        } else {
            builder.push(" and parent_path = ").push_bind(encoded);
        }
    }
    if let Some(raw) = &filter.restore_path {
        let encoded = LabelPath::encode(raw);
        if filter.recursive {
            builder.push(" and restore_path <@ ").push_bind(encoded);
        } else {
            builder.push(" and restore_path = ").push_bind(encoded);
        }
    }
    if let Some(after) = filter.updated_after {
        builder.push(" and last_updated_time >= ").push_bind(after);
    }
    if let Some(before) = filter.updated_before {
        builder.push(" and last_updated_time <= ").push_bind(before);
    }
    if let Some(clause) = permission_clause {
        builder.push(" and (").push(clause).push(")");
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------

fn status_for_create(type_: ItemType) -> ItemStatus {
    match type_ {
        ItemType::File => ItemStatus::Registered,
        ItemType::Folder | ItemType::NameFolder => ItemStatus::Active,
    }
}

fn validate_hierarchy(type_: ItemType, container_type: ContainerType, parent: Option<Uuid>, parent_path: &Option<String>) -> Result<(), ApiError> {
    match type_ {
        ItemType::NameFolder => {
            if parent.is_some() || parent_path.is_some() || container_type != ContainerType::Project {
                return Err(ApiError::BadRequest(
                    "a name_folder has no parent, no parent_path, and belongs to a project container".into(),
                ));
            }
        }
        ItemType::Folder | ItemType::File => {
            if container_type == ContainerType::Project && (parent.is_none() || parent_path.is_none()) {
                return Err(ApiError::BadRequest(
                    "a file or folder in a project container requires both parent and parent_path".into(),
                ));
            }
        }
    }
    Ok(())
}

fn validate_folder_name(name: &str) -> Result<(), ApiError> {
    if name.contains('/') {
        return Err(ApiError::Validation("item name must not contain '/'".into()));
    }
    Ok(())
}

fn validate_file_only_attributes(type_: ItemType, template_id: Option<Uuid>, attributes: &HashMap<String, String>) -> Result<(), ApiError> {
    if type_ != ItemType::File && (template_id.is_some() || !attributes.is_empty()) {
        return Err(ApiError::BadRequest("attribute_template_id/attributes may only be set on file items".into()));
    }
    Ok(())
}

fn validate_caps(tags: &[String], system_tags: &[String], attributes: &HashMap<String, String>, limits: &Limits) -> Result<(), ApiError> {
    if tags.len() > limits.max_tags {
        return Err(ApiError::Validation(format!("tags exceed the cap of {}", limits.max_tags)));
    }
    if system_tags.len() > limits.max_system_tags {
        return Err(ApiError::Validation(format!("system_tags exceed the cap of {}", limits.max_system_tags)));
    }
    for value in attributes.values() {
        if value.len() > limits.max_attribute_length {
            return Err(ApiError::Validation(format!(
                "attribute value exceeds the cap of {} characters",
                limits.max_attribute_length
            )));
        }
    }
    Ok(())
}

/// Checks a proposed `(template_id, attributes)` pair against the
/// template schema: with
/// no template and no attributes, accept; otherwise the input must not
/// exceed the template's field count, and no non-optional field with
/// defined `options` may carry a value outside those options.
async fn check_attribute_consistency(
    pool: &PgPool,
    template_id: Option<Uuid>,
    attributes: &HashMap<String, String>,
) -> Result<(), ApiError> {
    let template = match template_id {
        None => {
            if attributes.is_empty() {
                return Ok(());
            }
            return Err(ApiError::BadRequest("attributes supplied without an attribute_template_id".into()));
        }
        Some(id) => super::templates::find_by_id(pool, id).await?,
    };
    check_attribute_consistency_against(&template, attributes)
}

fn check_attribute_consistency_against(template: &AttributeTemplateRow, attributes: &HashMap<String, String>) -> Result<(), ApiError> {
    if attributes.len() > template.attributes.0.len() {
        return Err(ApiError::Validation("more attributes supplied than the template defines".into()));
    }
    for field in &template.attributes.0 {
        if field.optional {
            continue;
        }
        let Some(options) = &field.options else { continue };
        if let Some(value) = attributes.get(&field.name) {
            if !options.contains(value) {
                return Err(ApiError::Validation(format!(
                    "attribute '{}' must be one of the template's options",
                    field.name
                )));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------

#[tracing::instrument(skip(pool, publisher, input), err(Debug))]
pub async fn create_item(
    pool: &PgPool,
    publisher: &dyn EventPublisher,
    limits: &Limits,
    input: CreateItemInput,
) -> Result<ItemResponse, ApiError> {
    validate_folder_name(&input.name)?;
    validate_hierarchy(input.type_, input.container_type, input.parent, &input.parent_path)?;
    validate_file_only_attributes(input.type_, input.attribute_template_id, &input.attributes)?;
    validate_caps(&input.tags, &input.system_tags, &input.attributes, limits)?;
    check_attribute_consistency(pool, input.attribute_template_id, &input.attributes).await?;

    let id = Uuid::new_v4();
    let status = status_for_create(input.type_);
    let encoded_parent_path = input.parent_path.as_deref().map(LabelPath::encode);
    let attributes_map: AttributeMap = match input.attribute_template_id {
        Some(template_id) => HashMap::from([(template_id.to_string(), input.attributes.clone())]),
        None => HashMap::new(),
    };

    let mut txn = pool.begin().await.map_err(ApiError::from)?;

    sqlx::query(
        r#"insert into metadata.items
             (id, parent, parent_path, restore_path, status, type, zone, name, size,
              owner, container_code, container_type, deleted)
           values ($1, $2, $3, null, $4, $5, $6, $7, $8, $9, $10, $11, false)"#,
    )
    .bind(id)
    .bind(input.parent)
    .bind(&encoded_parent_path)
    .bind(status)
    .bind(input.type_)
    .bind(input.zone)
    .bind(&input.name)
    .bind(input.size)
    .bind(&input.owner)
    .bind(&input.container_code)
    .bind(input.container_type)
    .execute(&mut *txn)
    .await
    .map_err(ApiError::from)?;

    sqlx::query("insert into metadata.storage (item_id, location_uri, version, upload_id) values ($1, $2, $3, $4)")
        .bind(id)
        .bind(&input.location_uri)
        .bind(&input.version)
        .bind(&input.upload_id)
        .execute(&mut *txn)
        .await
        .map_err(ApiError::from)?;

    sqlx::query("insert into metadata.extended (item_id, tags, system_tags, attributes) values ($1, $2, $3, $4)")
        .bind(id)
        .bind(&input.tags)
        .bind(&input.system_tags)
        .bind(sqlx::types::Json(&attributes_map))
        .execute(&mut *txn)
        .await
        .map_err(ApiError::from)?;

    if input.type_ == ItemType::File {
        match input.tfrm_type {
            Some(TfrmType::CopyToZone) => {
                let source = input
                    .tfrm_source
                    .ok_or_else(|| ApiError::BadRequest("tfrm_source is required for a copy_to_zone create".into()))?;
                let lineage_id = Uuid::new_v4();
                sqlx::query("insert into metadata.lineage (id, consumes, produces, tfrm_type) values ($1, $2, $3, $4)")
                    .bind(lineage_id)
                    .bind(&[source][..])
                    .bind(&[id][..])
                    .bind(TfrmType::CopyToZone)
                    .execute(&mut *txn)
                    .await
                    .map_err(ApiError::from)?;
                snapshot_provenance(&mut txn, source, Some(lineage_id)).await?;
                snapshot_item_row_provenance(&mut txn, id, Some(lineage_id)).await?;
            }
            _ => {
                snapshot_item_row_provenance(&mut txn, id, None).await?;
            }
        }
    }

    txn.commit().await.map_err(ApiError::from)?;

    let response = get_by_id(pool, id, None).await?;
    publisher
        .publish(ItemEventRecord::from_response(&response, false))
        .await
        .map_err(|error| ApiError::Internal(format!("failed to publish item-created event: {error:#}")))?;
    Ok(response)
}

/// Snapshots the *current* persisted state of `item_id` (as it already
/// exists in the row, before this call's own edits) into `provenance`.
async fn snapshot_provenance(txn: &mut PgConnection, item_id: Uuid, lineage_id: Option<Uuid>) -> Result<(), ApiError> {
    let item = sqlx::query_as::<_, ItemRow>(
        r#"select id, parent, parent_path, restore_path, status, type, zone, name, size,
                  owner, container_code, container_type, deleted, deleted_by, deleted_at,
                  created_time, last_updated_time
           from metadata.items where id = $1"#,
    )
    .bind(item_id)
    .fetch_one(&mut *txn)
    .await
    .map_err(ApiError::from)?;
    insert_provenance_row(txn, &item, lineage_id).await
}

/// Same as `snapshot_provenance` but for a row this call just wrote,
/// re-reading it to pick up defaults assigned by the database.
async fn snapshot_item_row_provenance(txn: &mut PgConnection, item_id: Uuid, lineage_id: Option<Uuid>) -> Result<(), ApiError> {
    snapshot_provenance(txn, item_id, lineage_id).await
}

async fn insert_provenance_row(txn: &mut PgConnection, item: &ItemRow, lineage_id: Option<Uuid>) -> Result<(), ApiError> {
    if item.type_ != ItemType::File {
        return Ok(());
    }
    sqlx::query(
        r#"insert into metadata.provenance
             (id, lineage_id, item_id, parent, parent_path, restore_path, status, type, zone,
              name, size, owner, container_code, container_type)
           values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
    )
    .bind(Uuid::new_v4())
    .bind(lineage_id)
    .bind(item.id)
    .bind(item.parent)
    .bind(&item.parent_path)
    .bind(&item.restore_path)
    .bind(item.status)
    .bind(item.type_)
    .bind(item.zone)
    .bind(&item.name)
    .bind(item.size)
    .bind(&item.owner)
    .bind(&item.container_code)
    .bind(item.container_type)
    .execute(&mut *txn)
    .await
    .map_err(ApiError::from)?;
    Ok(())
}

// ---------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------

#[tracing::instrument(skip(pool, publisher, input), err(Debug))]
pub async fn update_item(
    pool: &PgPool,
    publisher: &dyn EventPublisher,
    limits: &Limits,
    id: Uuid,
    input: UpdateItemInput,
) -> Result<ItemResponse, ApiError> {
    let current = fetch_item_row(pool, id)
        .await?
        .ok_or_else(|| ApiError::EntityNotFound(format!("item {id} not found")))?;

    if current.status == ItemStatus::Registered && input.status.is_none() {
        return Err(ApiError::BadRequest(
            "a REGISTERED item is write-locked except for a status transition".into(),
        ));
    }

    if let Some(name) = &input.name {
        validate_folder_name(name)?;
    }
    if input.attribute_template_id.is_some() || input.attributes.is_some() {
        validate_file_only_attributes(
            current.type_,
            input.attribute_template_id,
            input.attributes.as_ref().unwrap_or(&HashMap::new()),
        )?;
    }

    let extended = fetch_extended_row(pool, id).await?;
    let new_tags = input.tags.clone().unwrap_or_else(|| extended.tags.clone());
    let new_system_tags = input.system_tags.clone().unwrap_or_else(|| extended.system_tags.clone());
    validate_caps(&new_tags, &new_system_tags, input.attributes.as_ref().unwrap_or(&HashMap::new()), limits)?;

    let new_attributes_map = match (input.attribute_template_id, &input.attributes) {
        (Some(template_id), Some(attrs)) => {
            check_attribute_consistency(pool, Some(template_id), attrs).await?;
            HashMap::from([(template_id.to_string(), attrs.clone())])
        }
        (None, None) => extended.attributes.0.clone(),
        (template_id, attrs) => {
            // Partial update: merge onto whatever template key already exists.
            let mut merged = extended.attributes.0.clone();
            if let Some(attrs) = attrs {
                let key = template_id
                    .map(|t| t.to_string())
                    .or_else(|| merged.keys().next().cloned())
                    .unwrap_or_default();
                merged.insert(key, attrs.clone());
            }
            merged
        }
    };

    let new_status = input.status.unwrap_or(current.status);
    let new_name = input.name.clone().unwrap_or_else(|| current.name.clone());
    let new_parent = input.parent.or(current.parent);
    let new_encoded_parent_path = match &input.parent_path {
        Some(raw) => Some(LabelPath::encode(raw)),
        None => current.parent_path.clone(),
    };

    let mut txn = pool.begin().await.map_err(ApiError::from)?;

    let name_changed = new_name != current.name;
    let path_changed = new_encoded_parent_path != current.parent_path;

    if current.status == ItemStatus::Active && path_changed {
        if let Some(new_parent_path) = &new_encoded_parent_path {
            move_subtree(&mut txn, &current, new_parent_path).await?;
        }
    }
    if current.status == ItemStatus::Active && name_changed {
        rename_subtree(&mut txn, &current, &new_name).await?;
    }

    sqlx::query(
        r#"update metadata.items set
             status = $1, parent = $2, parent_path = $3, name = $4, size = coalesce($5, size),
             last_updated_time = now()
           where id = $6"#,
    )
    .bind(new_status)
    .bind(new_parent)
    .bind(&new_encoded_parent_path)
    .bind(&new_name)
    .bind(input.size)
    .bind(id)
    .execute(&mut *txn)
    .await
    .map_err(ApiError::from)?;

    if input.location_uri.is_some() || input.version.is_some() || input.upload_id.is_some() {
        sqlx::query(
            r#"update metadata.storage set
                 location_uri = coalesce($1, location_uri),
                 version = coalesce($2, version),
                 upload_id = coalesce($3, upload_id)
               where item_id = $4"#,
        )
        .bind(&input.location_uri)
        .bind(&input.version)
        .bind(&input.upload_id)
        .bind(id)
        .execute(&mut *txn)
        .await
        .map_err(ApiError::from)?;
    }

    sqlx::query("update metadata.extended set tags = $1, system_tags = $2, attributes = $3 where item_id = $4")
        .bind(&new_tags)
        .bind(&new_system_tags)
        .bind(sqlx::types::Json(&new_attributes_map))
        .bind(id)
        .execute(&mut *txn)
        .await
        .map_err(ApiError::from)?;

    snapshot_provenance(&mut txn, id, None).await?;
    txn.commit().await.map_err(ApiError::from)?;

    let response = get_by_id(pool, id, None).await?;
    publisher
        .publish(ItemEventRecord::from_response(&response, false))
        .await
        .map_err(|error| ApiError::Internal(format!("failed to publish item-updated event: {error:#}")))?;
    Ok(response)
}

/// Fetches every item whose `parent_path` is `root_path` or a
/// descendant of it (direct children and everything beneath them).
async fn fetch_descendants(txn: &mut PgConnection, root_path: &LabelPath) -> Result<Vec<ItemRow>, ApiError> {
    sqlx::query_as::<_, ItemRow>(
        r#"select id, parent, parent_path, restore_path, status, type, zone, name, size,
                  owner, container_code, container_type, deleted, deleted_by, deleted_at,
                  created_time, last_updated_time
           from metadata.items where parent_path <@ $1"#,
    )
    .bind(root_path)
    .fetch_all(&mut *txn)
    .await
    .map_err(ApiError::from)
}

/// Subtree move: the root's own `parent_path` has already been computed
/// by the caller; every descendant's `parent_path` is rewritten by
/// replacing the root's old full path prefix with its new one, grouped
/// implicitly by depth since every descendant shares that same prefix.
async fn move_subtree(txn: &mut PgConnection, root: &ItemRow, new_parent_path: &LabelPath) -> Result<(), ApiError> {
    let Some(old_parent_path) = &root.parent_path else { return Ok(()) };
    let own_label = path_codec::encode_label(&root.name);
    let old_root_path = child_path(Some(old_parent_path), &own_label);
    let new_root_path = child_path(Some(new_parent_path), &own_label);

    let descendants = fetch_descendants(txn, &old_root_path).await?;
    let prefix_len = segments(&old_root_path).len();
    for descendant in descendants {
        let Some(path) = &descendant.parent_path else { continue };
        let segs = segments(path);
        let suffix = &segs[prefix_len.min(segs.len())..];
        let mut rewritten: Vec<&str> = segments(&new_root_path);
        rewritten.extend_from_slice(suffix);
        let new_path = path_from_segments(&rewritten);
        sqlx::query("update metadata.items set parent_path = $1 where id = $2")
            .bind(&new_path)
            .bind(descendant.id)
            .execute(&mut *txn)
            .await
            .map_err(ApiError::from)?;
    }
    Ok(())
}

/// Subtree rename: splices the new label into every descendant's
/// `parent_path` at the depth the renamed item occupies (the number of
/// segments in its own `parent_path`).
async fn rename_subtree(txn: &mut PgConnection, root: &ItemRow, new_name: &str) -> Result<(), ApiError> {
    if root.type_ == ItemType::File {
        // A bare file rename never touches descendants (it has none).
        return Ok(());
    }
    let Some(parent_path) = &root.parent_path else { return Ok(()) };
    let old_label = path_codec::encode_label(&root.name);
    let new_label = path_codec::encode_label(new_name);
    let old_root_path = child_path(Some(parent_path), &old_label);
    let depth = segments(parent_path).len();

    let descendants = fetch_descendants(txn, &old_root_path).await?;
    for descendant in descendants {
        let Some(path) = &descendant.parent_path else { continue };
        let mut segs = segments(path);
        if let Some(slot) = segs.get_mut(depth) {
            *slot = &new_label;
        }
        let new_path = path_from_segments(&segs);
        sqlx::query("update metadata.items set parent_path = $1 where id = $2")
            .bind(&new_path)
            .bind(descendant.id)
            .execute(&mut *txn)
            .await
            .map_err(ApiError::from)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Archive / restore
// ---------------------------------------------------------------------

/// `get_available_file_name`: if no ACTIVE sibling at
/// `(container_code, container_type, zone, parent_path)` already carries
/// `candidate`, keep it; otherwise splice `_{unix_timestamp}` before the
/// first `.` (or append it outright for an extension-less name).
async fn available_file_name(
    pool_or_txn: impl sqlx::PgExecutor<'_>,
    container_code: &str,
    container_type: ContainerType,
    zone: i32,
    parent_path: Option<&LabelPath>,
    candidate: &str,
) -> Result<String, ApiError> {
    let taken: bool = match parent_path {
        Some(path) => sqlx::query_scalar(
            r#"select exists(select 1 from metadata.items
                 where container_code = $1 and container_type = $2 and zone = $3
                   and status = 'ACTIVE' and deleted = false and parent_path = $4 and name = $5)"#,
        )
        .bind(container_code)
        .bind(container_type)
        .bind(zone)
        .bind(path)
        .bind(candidate)
        .fetch_one(pool_or_txn)
        .await
        .map_err(ApiError::from)?,
        None => sqlx::query_scalar(
            r#"select exists(select 1 from metadata.items
                 where container_code = $1 and container_type = $2 and zone = $3
                   and status = 'ACTIVE' and deleted = false and parent_path is null and name = $4)"#,
        )
        .bind(container_code)
        .bind(container_type)
        .bind(zone)
        .bind(candidate)
        .fetch_one(pool_or_txn)
        .await
        .map_err(ApiError::from)?,
    };
    if !taken {
        return Ok(candidate.to_string());
    }
    let ts = unix_timestamp();
    Ok(match candidate.split_once('.') {
        Some((stem, ext)) => format!("{stem}_{ts}.{ext}"),
        None => format!("{candidate}_{ts}"),
    })
}

#[tracing::instrument(skip(pool, publisher), err(Debug))]
pub async fn archive_item(pool: &PgPool, publisher: &dyn EventPublisher, id: Uuid) -> Result<ItemResponse, ApiError> {
    let root = fetch_item_row(pool, id)
        .await?
        .ok_or_else(|| ApiError::EntityNotFound(format!("item {id} not found")))?;
    if root.type_ == ItemType::NameFolder {
        return Err(ApiError::BadRequest("name_folder items cannot be archived".into()));
    }
    if root.status == ItemStatus::Archived {
        return get_by_id(pool, id, None).await;
    }

    let mut txn = pool.begin().await.map_err(ApiError::from)?;

    // The collision check on archive intentionally uses a
    // null parent_path, matching the original's call with
    // `encoded_item_path=None`.
    let new_name = available_file_name(&mut *txn, &root.container_code, root.container_type, root.zone, None, &root.name).await?;

    let old_root_path = root.parent_path.clone();
    let mut affected_ids = vec![id];
    if let Some(old_root_path) = &old_root_path {
        let own_label = path_codec::encode_label(&root.name);
        let full_old_path = child_path(Some(old_root_path), &own_label);
        let new_label = path_codec::encode_label(&new_name);
        let depth = segments(old_root_path).len();

        let descendants = fetch_descendants(&mut txn, &full_old_path).await?;
        for descendant in descendants {
            let Some(path) = &descendant.parent_path else { continue };
            let mut segs = segments(path);
            if let Some(slot) = segs.get_mut(depth) {
                *slot = &new_label;
            }
            let new_restore_path = path_from_segments(&segs);
            sqlx::query(
                "update metadata.items set restore_path = $1, parent_path = null, status = 'ARCHIVED' where id = $2",
            )
            .bind(&new_restore_path)
            .bind(descendant.id)
            .execute(&mut *txn)
            .await
            .map_err(ApiError::from)?;
            snapshot_provenance(&mut txn, descendant.id, None).await?;
            affected_ids.push(descendant.id);
        }
    }

    sqlx::query(
        r#"update metadata.items set
             name = $1, restore_path = $2, parent_path = null, parent = null,
             status = 'ARCHIVED', last_updated_time = now()
           where id = $3"#,
    )
    .bind(&new_name)
    .bind(&old_root_path)
    .bind(id)
    .execute(&mut *txn)
    .await
    .map_err(ApiError::from)?;

    let lineage_id = Uuid::new_v4();
    sqlx::query("insert into metadata.lineage (id, consumes, produces, tfrm_type) values ($1, $2, null, $3)")
        .bind(lineage_id)
        .bind(&[id][..])
        .bind(TfrmType::Archive)
        .execute(&mut *txn)
        .await
        .map_err(ApiError::from)?;
    snapshot_provenance(&mut txn, id, Some(lineage_id)).await?;

    // Archiving only flips status and rewrites paths; it never touches
    // favourites, so stale rows would otherwise point at a trashed item
    // for every user who favourited it or any of its descendants.
    sqlx::query("delete from metadata.favourites where item_id = any($1)")
        .bind(&affected_ids)
        .execute(&mut *txn)
        .await
        .map_err(ApiError::from)?;

    txn.commit().await.map_err(ApiError::from)?;

    let response = get_by_id(pool, id, None).await?;
    publisher
        .publish(ItemEventRecord::from_response(&response, false))
        .await
        .map_err(|error| ApiError::Internal(format!("failed to publish item-archived event: {error:#}")))?;
    Ok(response)
}

#[tracing::instrument(skip(pool, publisher), err(Debug))]
pub async fn restore_item(pool: &PgPool, publisher: &dyn EventPublisher, id: Uuid) -> Result<ItemResponse, ApiError> {
    let root = fetch_item_row(pool, id)
        .await?
        .ok_or_else(|| ApiError::EntityNotFound(format!("item {id} not found")))?;
    if root.status != ItemStatus::Archived {
        return Err(ApiError::BadRequest("only an ARCHIVED item can be restored".into()));
    }
    let restore_path = root
        .restore_path
        .clone()
        .ok_or_else(|| ApiError::Internal("archived item has no restore_path".into()))?;

    let mut txn = pool.begin().await.map_err(ApiError::from)?;

    let (prefix, last_label) = split_trailing(&restore_path);
    if let Some(label) = &last_label {
        let decoded_name = path_codec::decode_label(label).map_err(|_| ApiError::Internal("corrupt restore_path label".into()))?;
        let exists: bool = match &prefix {
            Some(p) => sqlx::query_scalar(
                r#"select exists(select 1 from metadata.items
                     where parent_path = $1 and name = $2 and status = 'ACTIVE'
                       and container_code = $3 and container_type = $4 and zone = $5)"#,
            )
            .bind(p)
            .bind(&decoded_name)
            .bind(&root.container_code)
            .bind(root.container_type)
            .bind(root.zone)
            .fetch_one(&mut *txn)
            .await
            .map_err(ApiError::from)?,
            None => sqlx::query_scalar(
                r#"select exists(select 1 from metadata.items
                     where parent_path is null and name = $1 and status = 'ACTIVE'
                       and container_code = $2 and container_type = $3 and zone = $4)"#,
            )
            .bind(&decoded_name)
            .bind(&root.container_code)
            .bind(root.container_type)
            .bind(root.zone)
            .fetch_one(&mut *txn)
            .await
            .map_err(ApiError::from)?,
        };
        if !exists {
            return Err(ApiError::BadRequest("Restore destination does not exist".into()));
        }
    }

    let new_name = available_file_name(
        &mut *txn,
        &root.container_code,
        root.container_type,
        root.zone,
        Some(&restore_path),
        &root.name,
    )
    .await?;

    let own_label = path_codec::encode_label(&new_name);
    let old_own_label = path_codec::encode_label(&root.name);
    let full_old_restore_path = child_path(Some(&restore_path), &old_own_label);
    let depth = segments(&restore_path).len();

    let descendants = fetch_descendants(&mut txn, &full_old_restore_path).await?;
    for descendant in descendants {
        let Some(path) = &descendant.restore_path else { continue };
        let mut segs = segments(path);
        if let Some(slot) = segs.get_mut(depth) {
            *slot = &own_label;
        }
        let new_parent_path = path_from_segments(&segs);
        sqlx::query("update metadata.items set parent_path = $1, restore_path = null, status = 'ACTIVE' where id = $2")
            .bind(&new_parent_path)
            .bind(descendant.id)
            .execute(&mut *txn)
            .await
            .map_err(ApiError::from)?;
        snapshot_provenance(&mut txn, descendant.id, None).await?;
    }

    sqlx::query(
        r#"update metadata.items set
             name = $1, parent_path = $2, restore_path = null, status = 'ACTIVE',
             last_updated_time = now()
           where id = $3"#,
    )
    .bind(&new_name)
    .bind(&restore_path)
    .bind(id)
    .execute(&mut *txn)
    .await
    .map_err(ApiError::from)?;

    snapshot_provenance(&mut txn, id, None).await?;
    txn.commit().await.map_err(ApiError::from)?;

    let response = get_by_id(pool, id, None).await?;
    publisher
        .publish(ItemEventRecord::from_response(&response, false))
        .await
        .map_err(|error| ApiError::Internal(format!("failed to publish item-restored event: {error:#}")))?;
    Ok(response)
}

// ---------------------------------------------------------------------
// Delete / bequeath
// ---------------------------------------------------------------------

#[tracing::instrument(skip(pool, publisher), err(Debug))]
pub async fn delete_item(pool: &PgPool, publisher: &dyn EventPublisher, id: Uuid) -> Result<(), ApiError> {
    let root = fetch_item_row(pool, id)
        .await?
        .ok_or_else(|| ApiError::EntityNotFound(format!("item {id} not found")))?;

    let mut to_delete = Vec::new();
    let location = root.parent_path.clone().or_else(|| root.restore_path.clone());
    if let Some(location) = &location {
        let own_label = path_codec::encode_label(&root.name);
        let full_path = child_path(Some(location), &own_label);
        let mut txn = pool.begin().await.map_err(ApiError::from)?;
        to_delete = fetch_descendants(&mut txn, &full_path).await?;
        txn.commit().await.map_err(ApiError::from)?;
    }
    // Depth-first: deepest descendants first, root last.
    to_delete.sort_by_key(|row| std::cmp::Reverse(row.parent_path.as_ref().map(|p| segments(p).len()).unwrap_or(0)));
    to_delete.push(root.clone());

    let responses: Result<Vec<_>, ApiError> = {
        let mut out = Vec::with_capacity(to_delete.len());
        for row in &to_delete {
            out.push(assemble(pool, row.clone(), None).await?);
        }
        Ok(out)
    };
    let responses = responses?;

    let ids: Vec<Uuid> = to_delete.iter().map(|r| r.id).collect();
    sqlx::query("delete from metadata.items where id = any($1)")
        .bind(&ids)
        .execute(pool)
        .await
        .map_err(ApiError::from)?;

    for response in responses {
        publisher
            .publish(ItemEventRecord::from_response(&response, true))
            .await
            .map_err(|error| ApiError::Internal(format!("failed to publish item-deleted event: {error:#}")))?;
    }
    Ok(())
}

#[tracing::instrument(skip(pool, publisher), err(Debug))]
pub async fn bequeath_item(
    pool: &PgPool,
    publisher: &dyn EventPublisher,
    limits: &Limits,
    id: Uuid,
    attribute_template_id: Option<Uuid>,
    attributes: Option<HashMap<String, String>>,
    system_tags: Option<Vec<String>>,
) -> Result<Vec<ItemResponse>, ApiError> {
    let root = fetch_item_row(pool, id)
        .await?
        .ok_or_else(|| ApiError::EntityNotFound(format!("item {id} not found")))?;
    if root.type_ != ItemType::Folder {
        return Err(ApiError::BadRequest("only folders may bequeath attributes to descendants".into()));
    }
    if let (Some(_), Some(attrs)) = (attribute_template_id, &attributes) {
        check_attribute_consistency(pool, attribute_template_id, attrs).await?;
    }
    if let Some(tags) = &system_tags {
        validate_caps(&[], tags, &HashMap::new(), limits)?;
    }

    let Some(parent_path) = &root.parent_path else { return Ok(Vec::new()) };
    let own_label = path_codec::encode_label(&root.name);
    let full_path = child_path(Some(parent_path), &own_label);

    let mut txn = pool.begin().await.map_err(ApiError::from)?;
    let descendants = fetch_descendants(&mut txn, &full_path).await?;

    let mut out = Vec::with_capacity(descendants.len());
    for descendant in &descendants {
        if let (Some(template_id), Some(attrs)) = (attribute_template_id, &attributes) {
            let map: AttributeMap = HashMap::from([(template_id.to_string(), attrs.clone())]);
            sqlx::query("update metadata.extended set attributes = $1 where item_id = $2")
                .bind(sqlx::types::Json(&map))
                .bind(descendant.id)
                .execute(&mut *txn)
                .await
                .map_err(ApiError::from)?;
        }
        if let Some(tags) = &system_tags {
            sqlx::query("update metadata.extended set system_tags = $1 where item_id = $2")
                .bind(tags)
                .bind(descendant.id)
                .execute(&mut *txn)
                .await
                .map_err(ApiError::from)?;
        }
        if descendant.type_ == ItemType::File {
            snapshot_provenance(&mut txn, descendant.id, None).await?;
        }
    }
    txn.commit().await.map_err(ApiError::from)?;

    for descendant in &descendants {
        let response = get_by_id(pool, descendant.id, None).await?;
        publisher
            .publish(ItemEventRecord::from_response(&response, false))
            .await
            .map_err(|error| ApiError::Internal(format!("failed to publish bequeath event: {error:#}")))?;
        out.push(response);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_path_joins_dot_separated_labels() {
        let parent = LabelPath("YWJj".into());
        let path = child_path(Some(&parent), "eGR5");
        assert_eq!(path.as_str(), "YWJj.eGR5");
    }

    #[test]
    fn child_path_with_no_parent_is_the_label_itself() {
        let path = child_path(None, "eGR5");
        assert_eq!(path.as_str(), "eGR5");
    }

    #[test]
    fn split_trailing_separates_last_segment() {
        let path = LabelPath("a.b.c".into());
        let (prefix, last) = split_trailing(&path);
        assert_eq!(prefix.unwrap().as_str(), "a.b");
        assert_eq!(last.unwrap(), "c");
    }

    #[test]
    fn split_trailing_single_segment_has_no_prefix() {
        let path = LabelPath("a".into());
        let (prefix, last) = split_trailing(&path);
        assert!(prefix.is_none());
        assert_eq!(last.unwrap(), "a");
    }

    #[test]
    fn validate_hierarchy_rejects_name_folder_with_parent() {
        let err = validate_hierarchy(ItemType::NameFolder, ContainerType::Project, Some(Uuid::nil()), &None);
        assert!(err.is_err());
    }

    #[test]
    fn validate_hierarchy_requires_parent_for_project_files() {
        let err = validate_hierarchy(ItemType::File, ContainerType::Project, None, &None);
        assert!(matches!(err, Err(ApiError::BadRequest(_))));
        assert!(validate_hierarchy(ItemType::File, ContainerType::Dataset, None, &None).is_ok());
    }

    #[test]
    fn validate_folder_name_rejects_embedded_slash() {
        assert!(validate_folder_name("a/b").is_err());
        assert!(validate_folder_name("a-b").is_ok());
    }

    #[test]
    fn validate_caps_rejects_over_limit_tags() {
        let limits = Limits { max_tags: 1, max_system_tags: 10, max_attribute_length: 10 };
        let tags = vec!["a".to_string(), "b".to_string()];
        assert!(validate_caps(&tags, &[], &HashMap::new(), &limits).is_err());
    }

    #[test]
    fn check_attribute_consistency_rejects_option_violation() {
        let template = AttributeTemplateRow {
            id: Uuid::nil(),
            name: "t".into(),
            project_code: "p".into(),
            attributes: sqlx::types::Json(vec![domain::AttributeField {
                name: "choice".into(),
                optional: false,
                field_type: domain::AttributeFieldType::MultipleChoice,
                options: Some(vec!["a".into(), "b".into()]),
            }]),
        };
        let mut attrs = HashMap::new();
        attrs.insert("choice".to_string(), "c".to_string());
        assert!(check_attribute_consistency_against(&template, &attrs).is_err());
        attrs.insert("choice".to_string(), "a".to_string());
        assert!(check_attribute_consistency_against(&template, &attrs).is_ok());
    }
}
