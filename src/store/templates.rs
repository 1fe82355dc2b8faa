//! Attribute templates (C6): per-project schemas describing the
//! structured attributes a file item may carry. Grounded on
//! `app/routers/v1/templates/crud_template.py`.

use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{AttributeField, AttributeTemplateRow};
use crate::error::ApiError;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateTemplateInput {
    pub name: String,
    pub project_code: String,
    #[serde(default)]
    pub attributes: Vec<AttributeField>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UpdateTemplateInput {
    pub name: Option<String>,
    pub attributes: Option<Vec<AttributeField>>,
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<AttributeTemplateRow, ApiError> {
    sqlx::query_as::<_, AttributeTemplateRow>(
        "select id, name, project_code, attributes from metadata.attribute_templates where id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(ApiError::from)?
    .ok_or_else(|| ApiError::EntityNotFound(format!("attribute template {id} not found")))
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn list(pool: &PgPool, project_code: &str, name: Option<&str>) -> Result<Vec<AttributeTemplateRow>, ApiError> {
    sqlx::query_as::<_, AttributeTemplateRow>(
        r#"select id, name, project_code, attributes from metadata.attribute_templates
           where project_code = $1 and ($2::text is null or name ilike '%' || $2 || '%')
           order by name"#,
    )
    .bind(project_code)
    .bind(name)
    .fetch_all(pool)
    .await
    .map_err(ApiError::from)
}

#[tracing::instrument(skip(pool, input), err(Debug))]
pub async fn create(pool: &PgPool, input: CreateTemplateInput) -> Result<AttributeTemplateRow, ApiError> {
    let id = Uuid::new_v4();
    sqlx::query("insert into metadata.attribute_templates (id, name, project_code, attributes) values ($1, $2, $3, $4)")
        .bind(id)
        .bind(&input.name)
        .bind(&input.project_code)
        .bind(sqlx::types::Json(&input.attributes))
        .execute(pool)
        .await
        .map_err(ApiError::from)?;
    find_by_id(pool, id).await
}

#[tracing::instrument(skip(pool, input), err(Debug))]
pub async fn update(pool: &PgPool, id: Uuid, input: UpdateTemplateInput) -> Result<AttributeTemplateRow, ApiError> {
    let current = find_by_id(pool, id).await?;
    let name = input.name.unwrap_or(current.name);
    let attributes = input.attributes.unwrap_or(current.attributes.0);
    sqlx::query("update metadata.attribute_templates set name = $1, attributes = $2 where id = $3")
        .bind(&name)
        .bind(sqlx::types::Json(&attributes))
        .bind(id)
        .execute(pool)
        .await
        .map_err(ApiError::from)?;
    find_by_id(pool, id).await
}

/// Deletion never retroactively invalidates historical item
/// `attributes` maps keyed by this template's id.
#[tracing::instrument(skip(pool), err(Debug))]
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), ApiError> {
    let result = sqlx::query("delete from metadata.attribute_templates where id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(ApiError::from)?;
    if result.rows_affected() == 0 {
        return Err(ApiError::EntityNotFound(format!("attribute template {id} not found")));
    }
    Ok(())
}
