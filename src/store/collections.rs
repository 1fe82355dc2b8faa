//! Collections (C4): user-owned named bags of items, bounded per
//! `(owner, container_code)`. Grounded on
//! `app/routers/v1/collections/crud_collections.py`.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{CollectionRow, ItemResponse, ItemStatus};
use crate::error::ApiError;
use crate::pagination::PaginationRequest;

static FORBIDDEN_NAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[/:?*<>|"']"#).expect("static regex"));

fn validate_name(name: &str) -> Result<(), ApiError> {
    if FORBIDDEN_NAME_CHARS.is_match(name) {
        return Err(ApiError::Validation(
            "collection name must not contain / : ? * < > | \" '".into(),
        ));
    }
    Ok(())
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn create(pool: &PgPool, name: &str, owner: &str, container_code: &str, max_collections: i64) -> Result<CollectionRow, ApiError> {
    validate_name(name)?;
    let mut txn = pool.begin().await.map_err(ApiError::from)?;

    let count: i64 = sqlx::query_scalar("select count(*) from metadata.collections where owner = $1 and container_code = $2")
        .bind(owner)
        .bind(container_code)
        .fetch_one(&mut *txn)
        .await
        .map_err(ApiError::from)?;
    if count >= max_collections {
        return Err(ApiError::BadRequest(format!("Cannot create more than {max_collections} collections")));
    }

    let exists: bool = sqlx::query_scalar(
        "select exists(select 1 from metadata.collections where owner = $1 and container_code = $2 and name = $3)",
    )
    .bind(owner)
    .bind(container_code)
    .bind(name)
    .fetch_one(&mut *txn)
    .await
    .map_err(ApiError::from)?;
    if exists {
        return Err(ApiError::DuplicateRecord(format!("a collection named '{name}' already exists")));
    }

    let id = Uuid::new_v4();
    sqlx::query("insert into metadata.collections (id, name, owner, container_code) values ($1, $2, $3, $4)")
        .bind(id)
        .bind(name)
        .bind(owner)
        .bind(container_code)
        .execute(&mut *txn)
        .await
        .map_err(ApiError::from)?;
    txn.commit().await.map_err(ApiError::from)?;
    find_by_id(pool, id).await
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<CollectionRow, ApiError> {
    sqlx::query_as::<_, CollectionRow>(
        "select id, name, owner, container_code, created_time, last_updated_time from metadata.collections where id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(ApiError::from)?
    .ok_or_else(|| ApiError::EntityNotFound(format!("collection {id} not found")))
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn search(pool: &PgPool, owner: &str, container_code: &str, page: &PaginationRequest) -> Result<(Vec<CollectionRow>, i64), ApiError> {
    let total: i64 = sqlx::query_scalar("select count(*) from metadata.collections where owner = $1 and container_code = $2")
        .bind(owner)
        .bind(container_code)
        .fetch_one(pool)
        .await
        .map_err(ApiError::from)?;
    let rows = sqlx::query_as::<_, CollectionRow>(
        r#"select id, name, owner, container_code, created_time, last_updated_time from metadata.collections
           where owner = $1 and container_code = $2 order by name limit $3 offset $4"#,
    )
    .bind(owner)
    .bind(container_code)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .map_err(ApiError::from)?;
    Ok((rows, total))
}

/// Bulk rename: every `(id, new_name)` tuple is validated against the
/// live set before any write.
#[tracing::instrument(skip(pool, renames), err(Debug))]
pub async fn bulk_rename(pool: &PgPool, owner: &str, container_code: &str, renames: &[(Uuid, String)]) -> Result<Vec<CollectionRow>, ApiError> {
    for (_, name) in renames {
        validate_name(name)?;
    }
    let mut txn = pool.begin().await.map_err(ApiError::from)?;
    let existing = sqlx::query_as::<_, CollectionRow>(
        "select id, name, owner, container_code, created_time, last_updated_time from metadata.collections where owner = $1 and container_code = $2",
    )
    .bind(owner)
    .bind(container_code)
    .fetch_all(&mut *txn)
    .await
    .map_err(ApiError::from)?;

    let mut by_id: std::collections::HashMap<Uuid, String> = existing.iter().map(|c| (c.id, c.name.clone())).collect();
    for (id, new_name) in renames {
        if !by_id.contains_key(id) {
            return Err(ApiError::EntityNotFound(format!("collection {id} not found")));
        }
        by_id.insert(*id, new_name.clone());
    }
    let mut seen = std::collections::HashSet::new();
    for name in by_id.values() {
        if !seen.insert(name) {
            return Err(ApiError::DuplicateRecord(format!("duplicate collection name '{name}'")));
        }
    }

    for (id, new_name) in renames {
        sqlx::query("update metadata.collections set name = $1, last_updated_time = now() where id = $2")
            .bind(new_name)
            .bind(id)
            .execute(&mut *txn)
            .await
            .map_err(ApiError::from)?;
    }
    txn.commit().await.map_err(ApiError::from)?;

    let mut out = Vec::with_capacity(renames.len());
    for (id, _) in renames {
        out.push(find_by_id(pool, *id).await?);
    }
    Ok(out)
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), ApiError> {
    let result = sqlx::query("delete from metadata.collections where id = $1").bind(id).execute(pool).await.map_err(ApiError::from)?;
    if result.rows_affected() == 0 {
        return Err(ApiError::EntityNotFound(format!("collection {id} not found")));
    }
    Ok(())
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn add_item(pool: &PgPool, collection_id: Uuid, item_id: Uuid) -> Result<(), ApiError> {
    find_by_id(pool, collection_id).await?;
    sqlx::query("insert into metadata.items_collections (item_id, collection_id) values ($1, $2) on conflict do nothing")
        .bind(item_id)
        .bind(collection_id)
        .execute(pool)
        .await
        .map_err(ApiError::from)?;
    Ok(())
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn remove_item(pool: &PgPool, collection_id: Uuid, item_id: Uuid) -> Result<(), ApiError> {
    find_by_id(pool, collection_id).await?;
    sqlx::query("delete from metadata.items_collections where item_id = $1 and collection_id = $2")
        .bind(item_id)
        .bind(collection_id)
        .execute(pool)
        .await
        .map_err(ApiError::from)?;
    Ok(())
}

/// Lists items in a collection, filtered by `status` (default ACTIVE).
/// Further restriction by the permission filter (C3) happens in the
/// server layer via `permission_clause`.
#[tracing::instrument(skip(pool, permission_clause), err(Debug))]
pub async fn list_items(
    pool: &PgPool,
    collection_id: Uuid,
    status: Option<ItemStatus>,
    permission_clause: Option<&str>,
    page: &PaginationRequest,
) -> Result<(Vec<ItemResponse>, i64), ApiError> {
    find_by_id(pool, collection_id).await?;
    let status = status.unwrap_or(ItemStatus::Active);

    let mut count_sql = String::from(
        "select count(*) from metadata.items_collections ic join metadata.items i on i.id = ic.item_id \
         where ic.collection_id = $1 and i.status = $2",
    );
    if let Some(clause) = permission_clause {
        count_sql.push_str(" and (");
        count_sql.push_str(clause);
        count_sql.push(')');
    }
    let total: i64 = sqlx::query_scalar(&count_sql).bind(collection_id).bind(status).fetch_one(pool).await.map_err(ApiError::from)?;

    let mut sql = String::from(
        "select i.id from metadata.items_collections ic join metadata.items i on i.id = ic.item_id \
         where ic.collection_id = $1 and i.status = $2",
    );
    if let Some(clause) = permission_clause {
        sql.push_str(" and (");
        sql.push_str(clause);
        sql.push(')');
    }
    sql.push_str(" order by i.name limit $3 offset $4");
    let ids: Vec<Uuid> = sqlx::query_scalar(&sql)
        .bind(collection_id)
        .bind(status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await
        .map_err(ApiError::from)?;

    let items = super::items::get_by_ids(pool, &ids, None).await?;
    Ok((items, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_rejects_forbidden_characters() {
        for bad in ["a/b", "a:b", "a?b", "a*b", "a<b", "a>b", "a|b", "a\"b", "a'b"] {
            assert!(validate_name(bad).is_err(), "{bad} should be rejected");
        }
        assert!(validate_name("my collection-1").is_ok());
    }
}
