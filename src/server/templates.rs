//! HTTP handlers for `/v1/template/` (C6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiEnvelope, ApiError};
use crate::store::templates::{self, CreateTemplateInput, UpdateTemplateInput};

use super::App;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub project_code: String,
    pub name: Option<String>,
}

pub async fn list(State(app): State<Arc<App>>, Query(q): Query<ListQuery>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let rows = templates::list(&app.pool, &q.project_code, q.name.as_deref()).await?;
    let total = rows.len() as i64;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total, num_of_pages: 1, result: serde_json::to_value(rows).unwrap() }))
}

pub async fn create(State(app): State<Arc<App>>, Json(input): Json<CreateTemplateInput>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let row = templates::create(&app.pool, input).await?;
    Ok(Json(ApiEnvelope { code: 201, error_msg: String::new(), page: 0, total: 1, num_of_pages: 1, result: serde_json::to_value(row).unwrap() }))
}

pub async fn update(State(app): State<Arc<App>>, Path(id): Path<Uuid>, Json(input): Json<UpdateTemplateInput>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let row = templates::update(&app.pool, id, input).await?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 1, num_of_pages: 1, result: serde_json::to_value(row).unwrap() }))
}

pub async fn delete(State(app): State<Arc<App>>, Path(id): Path<Uuid>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    templates::delete(&app.pool, id).await?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 0, num_of_pages: 1, result: serde_json::Value::Null }))
}
