//! HTTP handlers for `/v1/favourite*` (C5).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiEnvelope, ApiError};
use crate::pagination::{page_of, PaginationRequest};
use crate::store::favourites::{self, FavouriteTarget};

use super::identity::Identity;
use super::App;

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    pub item_id: Option<Uuid>,
    pub collection_id: Option<Uuid>,
}

pub async fn create(State(app): State<Arc<App>>, identity: Identity, Json(body): Json<CreateBody>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let target = match (body.item_id, body.collection_id) {
        (Some(item_id), None) => FavouriteTarget::Item(item_id),
        (None, Some(collection_id)) => FavouriteTarget::Collection(collection_id),
        _ => return Err(ApiError::BadRequest("exactly one of item_id/collection_id is required".into())),
    };
    let row = favourites::create(&app.pool, &identity.0.username, target).await?;
    Ok(Json(ApiEnvelope { code: 201, error_msg: String::new(), page: 0, total: 1, num_of_pages: 1, result: serde_json::to_value(row).unwrap() }))
}

/// Accepts either a single `?id=` or a comma-separated `?ids=` for bulk
/// delete; the store iterates and fails on the first missing entity.
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub id: Option<Uuid>,
    pub ids: Option<String>,
}

fn parse_ids(id: Option<Uuid>, ids: Option<String>) -> Result<Vec<Uuid>, ApiError> {
    if let Some(id) = id {
        return Ok(vec![id]);
    }
    let Some(ids) = ids else {
        return Err(ApiError::BadRequest("either id or ids is required".into()));
    };
    ids.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| ApiError::BadRequest("ids must be a comma-separated list of UUIDs".into())))
        .collect()
}

pub async fn delete(State(app): State<Arc<App>>, Query(q): Query<DeleteQuery>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let ids = parse_ids(q.id, q.ids)?;
    favourites::bulk_delete(&app.pool, &ids).await?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 0, num_of_pages: 1, result: serde_json::Value::Null }))
}

/// `PUT /v1/favourite/`: pin/unpin a single favourite (`?id=`) or a
/// batch of them (`?ids=`), mirroring the bulk-delete query shape.
#[derive(Debug, Deserialize)]
pub struct PinQuery {
    pub id: Option<Uuid>,
    pub ids: Option<String>,
    pub pinned: bool,
}

pub async fn set_pinned(State(app): State<Arc<App>>, Query(q): Query<PinQuery>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let ids = parse_ids(q.id, q.ids)?;
    let rows = favourites::bulk_set_pinned(&app.pool, &ids, q.pinned).await?;
    let total = rows.len() as i64;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total, num_of_pages: 1, result: serde_json::to_value(rows).unwrap() }))
}

pub async fn list(State(app): State<Arc<App>>, identity: Identity, Query(page): Query<PaginationRequest>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let (rows, total) = favourites::list_for_user(&app.pool, &identity.0.username, &page).await?;
    let meta = page_of(&page, total);
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: meta.page, total: meta.total, num_of_pages: meta.num_of_pages, result: serde_json::to_value(rows).unwrap() }))
}

pub async fn list_for_user(State(app): State<Arc<App>>, Path(user): Path<String>, Query(page): Query<PaginationRequest>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let (rows, total) = favourites::list_for_user(&app.pool, &user, &page).await?;
    let meta = page_of(&page, total);
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: meta.page, total: meta.total, num_of_pages: meta.num_of_pages, result: serde_json::to_value(rows).unwrap() }))
}
