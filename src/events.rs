//! The event publisher (C8): normalizes a combined item record and hands
//! it to the event bus. The wire client itself (a Kafka-like broker) is
//! external; this module models the sink as a trait so
//! the rest of the crate never depends on a concrete broker.

use std::sync::Mutex;

use apache_avro::Schema;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{AttributeMap, ContainerType, ItemResponse, ItemStatus, ItemType};

/// The Avro schema mirrored from the normalized item record, matching
/// the event record's wire shape.
pub static ITEM_EVENT_SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::parse_str(
        r#"{
            "type": "record",
            "name": "MetadataItem",
            "fields": [
                {"name": "id", "type": "string"},
                {"name": "parent", "type": ["null", "string"], "default": null},
                {"name": "parent_path", "type": ["null", "string"], "default": null},
                {"name": "restore_path", "type": ["null", "string"], "default": null},
                {"name": "status", "type": "string"},
                {"name": "type", "type": "string"},
                {"name": "zone", "type": "int"},
                {"name": "name", "type": "string"},
                {"name": "size", "type": "long"},
                {"name": "owner", "type": ["null", "string"], "default": null},
                {"name": "container_code", "type": "string"},
                {"name": "container_type", "type": "string"},
                {"name": "created_time", "type": "string"},
                {"name": "last_updated_time", "type": "string"},
                {"name": "template_id", "type": ["null", "string"], "default": null},
                {"name": "template_name", "type": ["null", "string"], "default": null},
                {"name": "to_delete", "type": "boolean", "default": false}
            ]
        }"#,
    )
    .expect("static item event schema must parse")
});

/// The normalized record published to the event bus. Timestamps are
/// reparsed as UTC and, when the item carries attributes, the owning
/// template's id/name are attached -- mirroring the original
/// `KafkaProducerClient._format_item`.
#[derive(Debug, Clone, Serialize)]
pub struct ItemEventRecord {
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
    pub created_time: chrono::DateTime<chrono::Utc>,
    pub last_updated_time: chrono::DateTime<chrono::Utc>,
    pub template_id: Option<Uuid>,
    pub template_name: Option<String>,
    /// Set on records emitted by a hard delete.
    pub to_delete: bool,
}

impl ItemEventRecord {
    pub fn from_response(item: &ItemResponse, to_delete: bool) -> Self {
        let (template_id, template_name) = (item.extended.template_id, item.extended.template_name.clone());
        ItemEventRecord {
            id: item.id,
            parent: item.parent,
            parent_path: item.parent_path.clone(),
            restore_path: item.restore_path.clone(),
            status: item.status,
            type_: item.type_,
            zone: item.zone,
            name: item.name.clone(),
            size: item.size,
            owner: item.owner.clone(),
            container_code: item.container_code.clone(),
            container_type: item.container_type,
            created_time: item.created_time,
            last_updated_time: item.last_updated_time,
            template_id,
            template_name,
            to_delete,
        }
    }
}

/// Resolves the owning attribute template's id/name for a non-empty
/// attributes map, by looking at its single key (template id).
pub fn resolve_template_ref(attributes: &AttributeMap) -> Option<Uuid> {
    attributes.keys().next().and_then(|k| Uuid::parse_str(k).ok())
}

/// The event bus sink. A real implementation would Avro-serialize
/// `ItemEventRecord` against `ITEM_EVENT_SCHEMA` and hand the bytes to a
/// Kafka-compatible producer; that client is out of scope here.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, record: ItemEventRecord) -> anyhow::Result<()>;
}

/// Serializes a record against the schema without sending it anywhere,
/// for callers that only need to validate the record shape.
pub fn serialize_avro(record: &ItemEventRecord) -> anyhow::Result<Vec<u8>> {
    let value = serde_json::to_value(record)?;
    let avro_value = apache_avro::to_value(value)?;
    apache_avro::to_avro_datum(&ITEM_EVENT_SCHEMA, avro_value).map_err(Into::into)
}

/// The default in-process publisher: serializes and logs. Serialization
/// failures are returned to the caller rather than swallowed, since a
/// record that can't be encoded never reaches the bus.
#[derive(Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, record: ItemEventRecord) -> anyhow::Result<()> {
        let bytes = serialize_avro(&record).map_err(|error| {
            tracing::error!(item_id = %record.id, %error, "failed to serialize metadata item event");
            error
        })?;
        tracing::info!(item_id = %record.id, bytes = bytes.len(), "published metadata item event");
        Ok(())
    }
}

/// A test double that records every published record for later
/// inspection, instead of dropping it.
#[derive(Default)]
pub struct RecordingEventPublisher {
    pub records: Mutex<Vec<ItemEventRecord>>,
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, record: ItemEventRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExtendedResponse, StorageResponse};
    use std::collections::HashMap;

    fn sample_item() -> ItemResponse {
        ItemResponse {
            id: Uuid::nil(),
            parent: None,
            parent_path: Some("a/b".into()),
            restore_path: None,
            status: ItemStatus::Active,
            type_: ItemType::File,
            zone: 0,
            name: "f.txt".into(),
            size: 12,
            owner: Some("alice".into()),
            container_code: "proj".into(),
            container_type: ContainerType::Project,
            deleted: false,
            deleted_time: None,
            created_time: chrono::Utc::now(),
            last_updated_time: chrono::Utc::now(),
            storage: StorageResponse {
                location_uri: None,
                version: None,
                upload_id: None,
            },
            extended: ExtendedResponse {
                tags: vec![],
                system_tags: vec![],
                attributes: HashMap::new(),
                template_id: None,
                template_name: None,
            },
            favourite: false,
        }
    }

    #[test]
    fn serializes_against_schema() {
        let record = ItemEventRecord::from_response(&sample_item(), false);
        let bytes = serialize_avro(&record).unwrap();
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn recording_publisher_captures_records() {
        let publisher = RecordingEventPublisher::default();
        let record = ItemEventRecord::from_response(&sample_item(), true);
        publisher.publish(record).await.unwrap();
        assert_eq!(publisher.records.lock().unwrap().len(), 1);
        assert!(publisher.records.lock().unwrap()[0].to_delete);
    }

    #[test]
    fn resolves_template_ref_from_single_key() {
        let id = Uuid::new_v4();
        let mut attrs = AttributeMap::new();
        attrs.insert(id.to_string(), HashMap::new());
        assert_eq!(resolve_template_ref(&attrs), Some(id));
    }
}
