use crate::error::Result;
use crate::schema::EntitySchema;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const SNAPSHOT_VERSION: &str = "1.0.0";
pub const MIGRATION_ID_KEY: &str = "migrationId";

/// The full schema of a model at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSnapshot {
    #[serde(default)]
    pub model_hash: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub entities: BTreeMap<String, EntitySchema>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_version() -> String {
    SNAPSHOT_VERSION.to_string()
}

impl MigrationSnapshot {
    /// A snapshot with no tables and an empty hash: "nothing applied yet".
    pub fn empty() -> Self {
        MigrationSnapshot {
            model_hash: String::new(),
            version: default_version(),
            last_updated: Utc::now(),
            entities: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn from_schemas(schemas: Vec<EntitySchema>) -> Result<Self> {
        let entities: BTreeMap<String, EntitySchema> = schemas
            .into_iter()
            .map(|s| (s.table_name.clone(), s))
            .collect();
        let model_hash = compute_model_hash(&entities)?;
        Ok(MigrationSnapshot {
            model_hash,
            entities,
            ..Self::empty()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.model_hash.is_empty()
    }

    pub fn migration_id(&self) -> Option<&str> {
        self.metadata.get(MIGRATION_ID_KEY).map(String::as_str)
    }

    /// Table schema by class (type) name.
    pub fn entity_for_class(&self, class_name: &str) -> Option<&EntitySchema> {
        self.entities.values().find(|e| e.class_name == class_name)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Content hash over the table schemas only.
///
/// Tables are hashed in name order, and so are each table's columns and
/// relationships, so the hash depends on what the model declares rather
/// than on declaration order or file formatting. Result is base64 SHA-256.
pub fn compute_model_hash(entities: &BTreeMap<String, EntitySchema>) -> Result<String> {
    let canonical: BTreeMap<&String, EntitySchema> = entities
        .iter()
        .map(|(name, schema)| {
            let mut schema = schema.clone();
            schema.columns.sort_by(|a, b| a.name.cmp(&b.name));
            schema
                .relationships
                .sort_by(|a, b| a.from_field.cmp(&b.from_field));
            (name, schema)
        })
        .collect();

    let bytes = serde_json::to_vec(&canonical)?;
    let digest = Sha256::digest(&bytes);
    Ok(STANDARD.encode(digest))
}
