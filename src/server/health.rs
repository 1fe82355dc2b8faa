//! `GET /v1/health` (C9, expanded): a lightweight probe against every
//! table family, mirroring the original's `opsdb_check`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;

use super::App;

pub async fn health(State(app): State<Arc<App>>) -> StatusCode {
    const TABLES: &[&str] = &[
        "items",
        "extended",
        "attribute_templates",
        "storage",
        "items_collections",
        "favourites",
    ];
    for table in TABLES {
        let query = format!("select 1 from metadata.{table} limit 1");
        if let Err(error) = sqlx::query(&query).execute(&app.pool).await {
            tracing::error!(%table, %error, "health check failed");
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    StatusCode::NO_CONTENT
}
