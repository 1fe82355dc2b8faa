//! Lineage & provenance (C7): the append-only transformation graph plus
//! the per-snapshot item history view for a single item. Grounded on
//! `app/routers/v1/items/crud_lineage_provenance.py`.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{LineageRow, ProvenanceRow};
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize)]
pub struct LineageView {
    /// Lineage rows that reference the item in either `consumes` or
    /// `produces`, keyed by `lineage_id`.
    pub lineage: HashMap<Uuid, LineageRow>,
    /// Provenance snapshots for every item id appearing in those
    /// lineage rows, keyed by `item_id`.
    pub provenance: HashMap<Uuid, Vec<ProvenanceRow>>,
}

#[tracing::instrument(skip(pool), err(Debug))]
pub async fn lineage_for_item(pool: &PgPool, item_id: Uuid) -> Result<LineageView, ApiError> {
    let lineage_rows = sqlx::query_as::<_, LineageRow>(
        r#"select id, consumes, produces, tfrm_type from metadata.lineage
           where $1 = any(consumes) or $1 = any(produces)"#,
    )
    .bind(item_id)
    .fetch_all(pool)
    .await
    .map_err(ApiError::from)?;

    let mut related_ids: Vec<Uuid> = vec![item_id];
    for row in &lineage_rows {
        if let Some(ids) = &row.consumes {
            related_ids.extend(ids.iter().copied());
        }
        if let Some(ids) = &row.produces {
            related_ids.extend(ids.iter().copied());
        }
    }
    related_ids.sort();
    related_ids.dedup();

    let provenance_rows = sqlx::query_as::<_, ProvenanceRow>(
        r#"select id, lineage_id, item_id, parent, parent_path, restore_path, status, type, zone,
                  name, size, owner, container_code, container_type, snapshot_time
           from metadata.provenance where item_id = any($1) order by snapshot_time asc"#,
    )
    .bind(&related_ids)
    .fetch_all(pool)
    .await
    .map_err(ApiError::from)?;

    let mut lineage = HashMap::new();
    for row in lineage_rows {
        lineage.insert(row.id, row);
    }
    let mut provenance: HashMap<Uuid, Vec<ProvenanceRow>> = HashMap::new();
    for row in provenance_rows {
        provenance.entry(row.item_id).or_default().push(row);
    }

    Ok(LineageView { lineage, provenance })
}
