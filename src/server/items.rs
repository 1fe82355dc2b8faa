//! HTTP handlers for `/v1/item*` (C2 + C3 wired together).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{ContainerType, ItemStatus};
use crate::error::{ApiEnvelope, ApiError};
use crate::pagination::{page_of, PaginationRequest};
use crate::permissions::{self, CallerIdentity, LocationMode, ZoneFilter};
use crate::store::items::{self, CreateItemInput, ItemSearchFilter, UpdateItemInput};

use super::identity::Identity;
use super::App;

/// Escapes a literal for embedding in a predicate string built outside
/// of `QueryBuilder`'s own bind machinery. Only used for the
/// name-folder-level degenerate filter; every other permission
/// predicate embeds a Base32 label pattern, which by construction
/// contains no SQL metacharacters.
fn sql_quote_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

/// Builds the zone-visibility predicate for a listing, across both
/// zones, ANDed into the item query by `store::items::search`.
async fn build_permission_clause(
    app: &App,
    identity: &CallerIdentity,
    project_code: &str,
    container_type: ContainerType,
    is_archived: bool,
    has_parent_path: bool,
    has_restore_path: bool,
    recursive: bool,
) -> Result<Option<String>, ApiError> {
    if container_type == ContainerType::Dataset {
        return Ok(None);
    }
    let mode = permissions::location_mode(is_archived, has_parent_path, has_restore_path, recursive);
    let mut clauses = Vec::new();
    for zone in [app.greenroom_zone, app.core_zone] {
        let filter = permissions::resolve_zone_filter(app.authority.as_ref(), project_code, zone, identity).await?;
        match filter {
            ZoneFilter::Unrestricted => clauses.push(format!("zone = {zone}")),
            ZoneFilter::Denied => {}
            ZoneFilter::OwnNamefolderOnly => {
                let pattern = permissions::own_namefolder_pattern(&identity.username);
                let predicate = match mode {
                    LocationMode::RestorePath => format!("restore_path ~ '{pattern}.*'::lquery"),
                    LocationMode::ParentPath => format!("parent_path ~ '{pattern}.*'::lquery"),
                    LocationMode::NameFolderLevel => format!("name = {}", sql_quote_literal(&identity.username)),
                };
                clauses.push(format!("(zone = {zone} and {predicate})"));
            }
        }
    }
    if clauses.is_empty() {
        // Every zone denied: the clause must still exclude everything.
        return Ok(Some("false".to_string()));
    }
    Ok(Some(clauses.join(" or ")))
}

pub async fn get_by_id(State(app): State<Arc<App>>, axum::extract::Path(id): axum::extract::Path<Uuid>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let item = items::get_by_id(&app.pool, id, None).await?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 1, num_of_pages: 1, result: serde_json::to_value(item).unwrap() }))
}

#[derive(Debug, Deserialize)]
pub struct GetByLocationQuery {
    pub name: String,
    pub parent_path: Option<String>,
    pub container_code: String,
    pub container_type: ContainerType,
    pub zone: i32,
    pub status: ItemStatus,
}

pub async fn get_by_location(State(app): State<Arc<App>>, Query(q): Query<GetByLocationQuery>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let item = items::get_by_location(&app.pool, &q.name, q.parent_path.as_deref(), &q.container_code, q.container_type, q.zone, q.status).await?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 1, num_of_pages: 1, result: serde_json::to_value(item).unwrap() }))
}

pub async fn create(State(app): State<Arc<App>>, Json(input): Json<CreateItemInput>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let item = items::create_item(&app.pool, app.publisher.as_ref(), &app.limits, input).await?;
    Ok(Json(ApiEnvelope { code: 201, error_msg: String::new(), page: 0, total: 1, num_of_pages: 1, result: serde_json::to_value(item).unwrap() }))
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: Uuid,
}

pub async fn update(State(app): State<Arc<App>>, Query(q): Query<IdQuery>, Json(input): Json<UpdateItemInput>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let item = items::update_item(&app.pool, app.publisher.as_ref(), &app.limits, q.id, input).await?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 1, num_of_pages: 1, result: serde_json::to_value(item).unwrap() }))
}

#[derive(Debug, Deserialize)]
pub struct TrashRestoreQuery {
    pub id: Uuid,
    pub status: ItemStatus,
}

pub async fn trash_or_restore(State(app): State<Arc<App>>, Query(q): Query<TrashRestoreQuery>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let item = match q.status {
        ItemStatus::Archived => items::archive_item(&app.pool, app.publisher.as_ref(), q.id).await?,
        ItemStatus::Active => items::restore_item(&app.pool, app.publisher.as_ref(), q.id).await?,
        ItemStatus::Registered => return Err(ApiError::BadRequest("cannot transition an item back to REGISTERED".into())),
    };
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 1, num_of_pages: 1, result: serde_json::to_value(item).unwrap() }))
}

pub async fn hard_delete(State(app): State<Arc<App>>, Query(q): Query<IdQuery>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    items::delete_item(&app.pool, app.publisher.as_ref(), q.id).await?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 0, num_of_pages: 1, result: serde_json::Value::Null }))
}

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    pub ids: String,
}

pub async fn batch_get(State(app): State<Arc<App>>, Query(q): Query<BatchQuery>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let ids: Vec<Uuid> = q
        .ids
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<_, _>>()
        .map_err(|_| ApiError::BadRequest("ids must be a comma-separated list of UUIDs".into()))?;
    let items = items::get_by_ids(&app.pool, &ids, None).await?;
    let total = items.len() as i64;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total, num_of_pages: 1, result: serde_json::to_value(items).unwrap() }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(flatten)]
    pub filter: ItemSearchFilter,
    #[serde(flatten)]
    pub page: PaginationRequest,
}

pub async fn search(State(app): State<Arc<App>>, identity: Identity, Query(q): Query<SearchQuery>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let SearchQuery { filter, page } = q;
    let is_archived = filter.status == Some(ItemStatus::Archived);
    let project_code = filter.container_code.clone().unwrap_or_default();
    let container_type = filter.container_type.unwrap_or(ContainerType::Project);
    let clause = build_permission_clause(
        &app,
        &identity.0,
        &project_code,
        container_type,
        is_archived,
        filter.parent_path.is_some(),
        filter.restore_path.is_some(),
        filter.recursive,
    )
    .await?;

    let (results, total) = items::search(&app.pool, &filter, clause.as_deref(), &page).await?;
    let meta = page_of(&page, total);
    Ok(Json(ApiEnvelope {
        code: 200,
        error_msg: String::new(),
        page: meta.page,
        total: meta.total,
        num_of_pages: meta.num_of_pages,
        result: serde_json::to_value(results).unwrap(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct BequeathQuery {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct BequeathBody {
    #[serde(default)]
    pub attribute_template_id: Option<Uuid>,
    #[serde(default)]
    pub attributes: Option<std::collections::HashMap<String, String>>,
    #[serde(default)]
    pub system_tags: Option<Vec<String>>,
}

pub async fn bequeath(
    State(app): State<Arc<App>>,
    Query(q): Query<BequeathQuery>,
    Json(body): Json<BequeathBody>,
) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let items = items::bequeath_item(&app.pool, app.publisher.as_ref(), &app.limits, q.id, body.attribute_template_id, body.attributes, body.system_tags).await?;
    let total = items.len() as i64;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total, num_of_pages: 1, result: serde_json::to_value(items).unwrap() }))
}

// ---------------------------------------------------------------------
// Bulk create / update / delete on `/v1/items/batch/`. Each entry is
// handled through the same single-item store entry point as its
// non-batch counterpart, so every invariant, provenance snapshot, and
// publish call is identical to the one-at-a-time path; only the HTTP
// envelope batches the results.
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BatchCreateBody {
    pub items: Vec<CreateItemInput>,
    /// When set, a `DuplicateRecord` on one item is skipped rather than
    /// aborting the whole batch.
    #[serde(default)]
    pub skip_duplicates: bool,
}

pub async fn batch_create(State(app): State<Arc<App>>, Json(body): Json<BatchCreateBody>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let mut out = Vec::with_capacity(body.items.len());
    for input in body.items {
        match items::create_item(&app.pool, app.publisher.as_ref(), &app.limits, input).await {
            Ok(item) => out.push(item),
            Err(ApiError::DuplicateRecord(_)) if body.skip_duplicates => continue,
            Err(error) => return Err(error),
        }
    }
    let total = out.len() as i64;
    Ok(Json(ApiEnvelope { code: 201, error_msg: String::new(), page: 0, total, num_of_pages: 1, result: serde_json::to_value(out).unwrap() }))
}

#[derive(Debug, Deserialize)]
pub struct BatchUpdateEntry {
    pub id: Uuid,
    #[serde(flatten)]
    pub input: UpdateItemInput,
}

pub async fn batch_update(State(app): State<Arc<App>>, Json(entries): Json<Vec<BatchUpdateEntry>>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        out.push(items::update_item(&app.pool, app.publisher.as_ref(), &app.limits, entry.id, entry.input).await?);
    }
    let total = out.len() as i64;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total, num_of_pages: 1, result: serde_json::to_value(out).unwrap() }))
}

pub async fn batch_delete(State(app): State<Arc<App>>, Query(q): Query<BatchQuery>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let ids: Vec<Uuid> = q
        .ids
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<_, _>>()
        .map_err(|_| ApiError::BadRequest("ids must be a comma-separated list of UUIDs".into()))?;
    for id in &ids {
        items::delete_item(&app.pool, app.publisher.as_ref(), *id).await?;
    }
    let total = ids.len() as i64;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total, num_of_pages: 1, result: serde_json::Value::Null }))
}
