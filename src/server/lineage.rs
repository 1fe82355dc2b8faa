//! HTTP handler for `/v1/lineage/{item_id}/` (C7).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::error::{ApiEnvelope, ApiError};
use crate::store::lineage;

use super::App;

pub async fn get_lineage(State(app): State<Arc<App>>, Path(item_id): Path<Uuid>) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let view = lineage::lineage_for_item(&app.pool, item_id).await?;
    Ok(Json(ApiEnvelope { code: 200, error_msg: String::new(), page: 0, total: 1, num_of_pages: 1, result: serde_json::to_value(view).unwrap() }))
}
