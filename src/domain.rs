//! Core data model shared by the store and server layers: row types that
//! mirror the `metadata` schema tables, and the response DTOs assembled
//! from them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Type};
use uuid::Uuid;

use crate::path_codec;

/// Wraps an already Base32-encoded, dot-joined label path so it can be
/// bound to and read from a Postgres `ltree` column. Like the
/// `Interval` wrapper around `chrono::Duration`, this exists purely
/// because `ltree` has no built-in `sqlx` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPath(pub String);

impl LabelPath {
    pub fn encode(raw: &str) -> Self {
        LabelPath(path_codec::encode_path(raw))
    }

    pub fn decode(&self) -> Result<String, path_codec::PathCodecError> {
        path_codec::decode_path(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LabelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Type<sqlx::Postgres> for LabelPath {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("ltree")
    }
    fn compatible(ty: &PgTypeInfo) -> bool {
        *ty == Self::type_info() || <String as Type<sqlx::Postgres>>::compatible(ty)
    }
}

impl Encode<'_, sqlx::Postgres> for LabelPath {
    fn encode_by_ref(
        &self,
        buf: &mut PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>> {
        <&str as Encode<sqlx::Postgres>>::encode_by_ref(&self.0.as_str(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for LabelPath {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        <String as Decode<'r, sqlx::Postgres>>::decode(value).map(LabelPath)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_status_enum", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    /// Created by an upload flow but not yet complete.
    Registered,
    /// Upload is complete; the item is live in the tree.
    Active,
    /// Soft-deleted; lives under `restore_path` instead of `parent_path`.
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "type_enum", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    NameFolder,
    Folder,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "container_enum", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    Project,
    Dataset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "tfrm_type_enum", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TfrmType {
    CopyToZone,
    Archive,
}

/// Zone constants, mirroring `GREENROOM_ZONE_VALUE` / `CORE_ZONE_VALUE`.
pub const GREENROOM_ZONE: i32 = 0;
pub const CORE_ZONE: i32 = 1;

pub fn zone_label(zone: i32) -> &'static str {
    match zone {
        CORE_ZONE => "Core",
        _ => "Greenroom",
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRow {
    pub id: Uuid,
    pub parent: Option<Uuid>,
    pub parent_path: Option<LabelPath>,
    pub restore_path: Option<LabelPath>,
    pub status: ItemStatus,
    #[sqlx(rename = "type")]
    pub type_: ItemType,
    pub zone: i32,
    pub name: String,
    pub size: i64,
    pub owner: Option<String>,
    pub container_code: String,
    pub container_type: ContainerType,
    pub deleted: bool,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StorageRow {
    pub item_id: Uuid,
    pub location_uri: Option<String>,
    pub version: Option<String>,
    pub upload_id: Option<String>,
}

pub type AttributeMap = HashMap<String, HashMap<String, String>>;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExtendedRow {
    pub item_id: Uuid,
    pub tags: Vec<String>,
    pub system_tags: Vec<String>,
    pub attributes: sqlx::types::Json<AttributeMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttributeFieldType {
    Text,
    MultipleChoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeField {
    pub name: String,
    pub optional: bool,
    #[serde(rename = "type")]
    pub field_type: AttributeFieldType,
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttributeTemplateRow {
    pub id: Uuid,
    pub name: String,
    pub project_code: String,
    pub attributes: sqlx::types::Json<Vec<AttributeField>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CollectionRow {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    pub container_code: String,
    pub created_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FavouriteRow {
    pub id: Uuid,
    #[sqlx(rename = "user")]
    pub user: String,
    pub item_id: Option<Uuid>,
    pub collection_id: Option<Uuid>,
    pub pinned: bool,
    pub created_time: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LineageRow {
    pub id: Uuid,
    pub consumes: Option<Vec<Uuid>>,
    pub produces: Option<Vec<Uuid>>,
    pub tfrm_type: TfrmType,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProvenanceRow {
    pub id: Uuid,
    pub lineage_id: Option<Uuid>,
    pub item_id: Uuid,
    pub parent: Option<Uuid>,
    pub parent_path: Option<LabelPath>,
    pub restore_path: Option<LabelPath>,
    pub status: ItemStatus,
    #[sqlx(rename = "type")]
    pub type_: ItemType,
    pub zone: i32,
    pub name: String,
    pub size: i64,
    pub owner: Option<String>,
    pub container_code: String,
    pub container_type: ContainerType,
    pub snapshot_time: DateTime<Utc>,
}

/// The assembled `{item, storage, extended, favourite}` shape returned by
/// every item-returning endpoint, mirroring the original's
/// `combine_item_tables`.
#[derive(Debug, Clone, Serialize)]
pub struct ItemResponse {
    pub id: Uuid,
    pub parent: Option<Uuid>,
    pub parent_path: Option<String>,
    pub restore_path: Option<String>,
    pub status: ItemStatus,
    #[serde(rename = "type")]
    pub type_: ItemType,
    pub zone: i32,
    pub name: String,
    pub size: i64,
    pub owner: Option<String>,
    pub container_code: String,
    pub container_type: ContainerType,
    pub deleted: bool,
    pub deleted_time: Option<DateTime<Utc>>,
    pub created_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
    pub storage: StorageResponse,
    pub extended: ExtendedResponse,
    pub favourite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageResponse {
    pub location_uri: Option<String>,
    pub version: Option<String>,
    pub upload_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtendedResponse {
    pub tags: Vec<String>,
    pub system_tags: Vec<String>,
    pub attributes: AttributeMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
}

pub fn decode_opt_path(path: &Option<LabelPath>) -> Option<String> {
    path.as_ref()
        .map(|p| p.decode().unwrap_or_else(|_| p.as_str().to_string()))
}

pub fn combine_item(
    item: ItemRow,
    storage: StorageRow,
    extended: ExtendedRow,
    favourite: bool,
) -> ItemResponse {
    ItemResponse {
        id: item.id,
        parent: item.parent,
        parent_path: decode_opt_path(&item.parent_path),
        restore_path: decode_opt_path(&item.restore_path),
        status: item.status,
        type_: item.type_,
        zone: item.zone,
        name: item.name,
        size: item.size,
        owner: item.owner,
        container_code: item.container_code,
        container_type: item.container_type,
        deleted: item.deleted,
        deleted_time: item.deleted_at,
        created_time: item.created_time,
        last_updated_time: item.last_updated_time,
        storage: StorageResponse {
            location_uri: storage.location_uri,
            version: storage.version,
            upload_id: storage.upload_id,
        },
        extended: ExtendedResponse {
            tags: extended.tags,
            system_tags: extended.system_tags,
            attributes: extended.attributes.0,
            template_id: None,
            template_name: None,
        },
        favourite,
    }
}

/// Builds the display path shown on favourite responses:
/// `{container_code}/{Greenroom|Core}/{decoded path}`.
pub fn construct_display_path(container_code: &str, zone: i32, path: &LabelPath) -> String {
    let decoded = path.decode().unwrap_or_else(|_| path.as_str().to_string());
    format!("{container_code}/{}/{decoded}", zone_label(zone))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_label_maps_known_zones() {
        assert_eq!(zone_label(GREENROOM_ZONE), "Greenroom");
        assert_eq!(zone_label(CORE_ZONE), "Core");
    }

    #[test]
    fn display_path_decodes_labels() {
        let path = LabelPath::encode("user/test_folder");
        let display = construct_display_path("project123", CORE_ZONE, &path);
        assert_eq!(display, "project123/Core/user/test_folder");
    }
}
