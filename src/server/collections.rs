//! HTTP handlers for `/v1/collection*` (C4).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::ItemStatus;
use crate::error::{ApiEnvelope, ApiError};
use crate::pagination::{page_of, PaginationRequest};
use crate::store::collections;

use super::identity::Identity;
use super::App;

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    pub name: String,
    pub container_code: String,
}

pub async fn create(State(app): State<Arc<App>>, identity: Identity, Json(body): Json<CreateBody>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let row = collections::create(&app.pool, &body.name, &identity.0.username, &body.container_code, app.max_collections).await?;
    Ok(Json(ApiEnvelope { code: 201, error_msg: String::new(), page: 0, total: 1, num_of_pages: 1, result: serde_json::to_value(row).unwrap() }))
}

#[derive(Debug, Deserialize)]
pub struct RenameBody {
    pub name: String,
}

pub async fn rename(State(app): State<Arc<App>>, identity: Identity, Path(id): Path<Uuid>, Query(q): Query<CollectionScope>, Json(body): Json<RenameBody>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let rows = collections::bulk_rename(&app.pool, &identity.0.username, &q.container_code, &[(id, body.name)]).await?;
    let row = rows.into_iter().next().ok_or_else(|| ApiError::Internal("rename produced no row".into()))?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 1, num_of_pages: 1, result: serde_json::to_value(row).unwrap() }))
}

#[derive(Debug, Deserialize)]
pub struct CollectionScope {
    pub container_code: String,
}

pub async fn delete(State(app): State<Arc<App>>, Path(id): Path<Uuid>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    collections::delete(&app.pool, id).await?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 0, num_of_pages: 1, result: serde_json::Value::Null }))
}

#[derive(Debug, Deserialize)]
pub struct ItemLinkBody {
    pub collection_id: Uuid,
    pub item_id: Uuid,
}

pub async fn add_item(State(app): State<Arc<App>>, Json(body): Json<ItemLinkBody>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    collections::add_item(&app.pool, body.collection_id, body.item_id).await?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 0, num_of_pages: 1, result: serde_json::Value::Null }))
}

pub async fn remove_item(State(app): State<Arc<App>>, Query(body): Query<ItemLinkBody>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    collections::remove_item(&app.pool, body.collection_id, body.item_id).await?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 0, num_of_pages: 1, result: serde_json::Value::Null }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub container_code: String,
    #[serde(flatten)]
    pub page: PaginationRequest,
}

pub async fn search(State(app): State<Arc<App>>, identity: Identity, Query(q): Query<SearchQuery>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let (rows, total) = collections::search(&app.pool, &identity.0.username, &q.container_code, &q.page).await?;
    let meta = page_of(&q.page, total);
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: meta.page, total: meta.total, num_of_pages: meta.num_of_pages, result: serde_json::to_value(rows).unwrap() }))
}

#[derive(Debug, Deserialize)]
pub struct ListItemsQuery {
    pub status: Option<ItemStatus>,
    #[serde(flatten)]
    pub page: PaginationRequest,
}

pub async fn list_items(State(app): State<Arc<App>>, Path(id): Path<Uuid>, Query(q): Query<ListItemsQuery>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let (rows, total) = collections::list_items(&app.pool, id, q.status, None, &q.page).await?;
    let meta = page_of(&q.page, total);
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: meta.page, total: meta.total, num_of_pages: meta.num_of_pages, result: serde_json::to_value(rows).unwrap() }))
}
