//! The persistence layer: one module per table family that owns a
//! table family, each exposing plain `async fn(&PgPool, ...)` entry
//! points the server handlers call directly (no repository trait --
//! there is exactly one backing store).

pub mod collections;
pub mod favourites;
pub mod items;
pub mod lineage;
pub mod templates;
