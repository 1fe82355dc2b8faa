//! Favourites (C5): per-user pinnable markers over items or
//! collections. Grounded on `app/routers/v1/favourites/crud_favourites.py`.
//!
//! Preserves a documented asymmetry:
//! creating an item favourite does not check item ownership (only that
//! the item exists, is ACTIVE, and is not a `name_folder`); creating a
//! collection favourite does require the caller to own the collection.

use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{FavouriteRow, ItemStatus, ItemType};
use crate::error::ApiError;
use crate::pagination::PaginationRequest;

pub enum FavouriteTarget {
    Item(Uuid),
    Collection(Uuid),
}

#[tracing::instrument(skip(pool), err(Debug))]
async fn check_item_consistency(pool: &PgPool, item_id: Uuid) -> Result<(), ApiError> {
    let row = sqlx::query_as::<_, (ItemStatus, ItemType)>("select status, type from metadata.items where id = $1")
        .bind(item_id)
        .fetch_optional(pool)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::EntityNotFound(format!("item {item_id} not found")))?;
    if row.1 == ItemType::NameFolder {
        return Err(ApiError::BadRequest("a name_folder cannot be favourited".into()));
    }
    if row.0 != ItemStatus::Active {
        return Err(ApiError::BadRequest("only an ACTIVE item can be favourited".into()));
    }
    Ok(())
}

#[tracing::instrument(skip(pool), err(Debug))]
async fn check_collection_consistency(pool: &PgPool, collection_id: Uuid, user: &str) -> Result<(), ApiError> {
    let owner: String = sqlx::query_scalar("select owner from metadata.collections where id = $1")
        .bind(collection_id)
        .fetch_optional(pool)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::EntityNotFound(format!("collection {collection_id} not found")))?;
    if owner != user {
        return Err(ApiError::Forbidden("only the owner may favourite this collection".into()));
    }
    Ok(())
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn create(pool: &PgPool, user: &str, target: FavouriteTarget) -> Result<FavouriteRow, ApiError> {
    let (item_id, collection_id) = match target {
        FavouriteTarget::Item(id) => {
            check_item_consistency(pool, id).await?;
            (Some(id), None)
        }
        FavouriteTarget::Collection(id) => {
            check_collection_consistency(pool, id, user).await?;
            (None, Some(id))
        }
    };
    let id = Uuid::new_v4();
    sqlx::query(r#"insert into metadata.favourites (id, "user", item_id, collection_id) values ($1, $2, $3, $4)"#)
        .bind(id)
        .bind(user)
        .bind(item_id)
        .bind(collection_id)
        .execute(pool)
        .await
        .map_err(ApiError::from)?;
    find_by_id(pool, id).await
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<FavouriteRow, ApiError> {
    sqlx::query_as::<_, FavouriteRow>(
        r#"select id, "user", item_id, collection_id, pinned, created_time from metadata.favourites where id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(ApiError::from)?
    .ok_or_else(|| ApiError::EntityNotFound(format!("favourite {id} not found")))
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn set_pinned(pool: &PgPool, id: Uuid, pinned: bool) -> Result<FavouriteRow, ApiError> {
    let result = sqlx::query("update metadata.favourites set pinned = $1 where id = $2")
        .bind(pinned)
        .bind(id)
        .execute(pool)
        .await
        .map_err(ApiError::from)?;
    if result.rows_affected() == 0 {
        return Err(ApiError::EntityNotFound(format!("favourite {id} not found")));
    }
    find_by_id(pool, id).await
}

/// Bulk pin/unpin or delete: iterates and fails on the first missing
/// entity.
#[tracing::instrument(skip(pool, ids), err(Debug))]
pub async fn bulk_set_pinned(pool: &PgPool, ids: &[Uuid], pinned: bool) -> Result<Vec<FavouriteRow>, ApiError> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        out.push(set_pinned(pool, *id, pinned).await?);
    }
    Ok(out)
}

#[tracing::instrument(skip(pool, ids), err(Debug))]
pub async fn bulk_delete(pool: &PgPool, ids: &[Uuid]) -> Result<(), ApiError> {
    for id in ids {
        delete(pool, *id).await?;
    }
    Ok(())
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), ApiError> {
    let result = sqlx::query("delete from metadata.favourites where id = $1").bind(id).execute(pool).await.map_err(ApiError::from)?;
    if result.rows_affected() == 0 {
        return Err(ApiError::EntityNotFound(format!("favourite {id} not found")));
    }
    Ok(())
}

/// Lists a user's favourites, excluding archived items but always
/// including collections, ordered `pinned DESC` then `created_time`.
#[tracing::instrument(skip(pool), err(Debug))]
pub async fn list_for_user(pool: &PgPool, user: &str, page: &PaginationRequest) -> Result<(Vec<FavouriteRow>, i64), ApiError> {
    let total: i64 = sqlx::query_scalar(
        r#"select count(*) from metadata.favourites f
           left join metadata.items i on i.id = f.item_id
           where f."user" = $1 and (f.collection_id is not null or i.status = 'ACTIVE')"#,
    )
    .bind(user)
    .fetch_one(pool)
    .await
    .map_err(ApiError::from)?;

    let rows = sqlx::query_as::<_, FavouriteRow>(
        r#"select f.id, f."user", f.item_id, f.collection_id, f.pinned, f.created_time
           from metadata.favourites f
           left join metadata.items i on i.id = f.item_id
           where f."user" = $1 and (f.collection_id is not null or i.status = 'ACTIVE')
           order by f.pinned desc, f.created_time desc
           limit $2 offset $3"#,
    )
    .bind(user)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .map_err(ApiError::from)?;
    Ok((rows, total))
}
