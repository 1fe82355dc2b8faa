//! App state and router wiring (C13): an `Arc<App>` holding the
//! database pool, event publisher, and permission authority, and the
//! `/v1` route table.

mod collections;
mod favourites;
mod health;
mod identity;
mod items;
mod lineage;
mod templates;

use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post, put};
use axum::Router;

use crate::config::Config;
use crate::events::EventPublisher;
use crate::permissions::PermissionAuthority;
use crate::store::items::Limits;

pub struct App {
    pub pool: sqlx::PgPool,
    pub publisher: Arc<dyn EventPublisher>,
    pub authority: Arc<dyn PermissionAuthority>,
    pub limits: Limits,
    pub max_collections: i64,
    pub greenroom_zone: i32,
    pub core_zone: i32,
}

pub fn build_router(
    pool: sqlx::PgPool,
    publisher: Arc<dyn EventPublisher>,
    authority: Arc<dyn PermissionAuthority>,
    config: &Config,
) -> anyhow::Result<Router<()>> {
    let app = Arc::new(App {
        pool,
        publisher,
        authority,
        limits: config.limits(),
        max_collections: config.max_collections,
        greenroom_zone: config.greenroom_zone_value,
        core_zone: config.core_zone_value,
    });

    let allow_origin = config
        .allow_origin
        .iter()
        .map(|o| o.parse())
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse allowed origins")?;
    let cors = tower_http::cors::CorsLayer::new()
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_origin(tower_http::cors::AllowOrigin::list(allow_origin))
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request());

    let v1 = Router::new()
        .route("/health", get(health::health))
        .route("/item/{id}/", get(items::get_by_id))
        .route(
            "/item/",
            get(items::get_by_location)
                .post(items::create)
                .put(items::update)
                .patch(items::trash_or_restore)
                .delete(items::hard_delete),
        )
        .route(
            "/items/batch/",
            get(items::batch_get)
                .post(items::batch_create)
                .put(items::batch_update)
                .delete(items::batch_delete),
        )
        .route("/items/search/", get(items::search))
        .route("/items/batch/bequeath/", put(items::bequeath))
        .route("/template/", get(templates::list).post(templates::create))
        .route("/template/{id}/", put(templates::update).delete(templates::delete))
        .route("/collection/", post(collections::create))
        .route("/collection/{id}/", put(collections::rename).delete(collections::delete))
        .route("/collection/items/", post(collections::add_item).delete(collections::remove_item))
        .route("/collection/search/", get(collections::search))
        .route("/collection/{id}/items/", get(collections::list_items))
        .route(
            "/favourite/",
            get(favourites::list).post(favourites::create).put(favourites::set_pinned).delete(favourites::delete),
        )
        .route("/favourites/{user}/", get(favourites::list_for_user))
        .route("/lineage/{item_id}/", get(lineage::get_lineage))
        .with_state(app);

    let router = Router::new()
        .nest("/v1", v1)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors);

    Ok(router)
}
