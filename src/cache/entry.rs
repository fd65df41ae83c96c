//! Entity records with field-level merge semantics

use crate::cache::types::EntityFields;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A partially-known domain entity
///
/// `fields` always contains `"id"` equal to [`EntityRecord::id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Logical grouping, e.g. `users` or `posts`
    pub collection: String,

    /// Identifier within the collection
    pub id: String,

    /// Known attributes
    pub fields: EntityFields,

    /// Record metadata
    pub metadata: EntityMetadata,
}

impl EntityRecord {
    /// Create a record holding only its id
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        let now = Utc::now();
        let mut fields = EntityFields::new();
        fields.insert("id".to_string(), Value::String(id.clone()));

        Self {
            collection: collection.into(),
            id,
            fields,
            metadata: EntityMetadata {
                created_at: now,
                updated_at: now,
                version: 0,
            },
        }
    }

    /// Merge `patch` into this record
    ///
    /// Fields present in `patch` overwrite, absent fields are kept. The `id`
    /// field is never overwritten.
    pub fn merge(&mut self, patch: EntityFields) {
        for (name, value) in patch {
            if name == "id" {
                continue;
            }
            self.fields.insert(name, value);
        }
        self.metadata.updated_at = Utc::now();
        self.metadata.version += 1;
    }

    /// Get a single field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a string field
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Check whether every named field is known
    pub fn has_fields(&self, required: &[&str]) -> bool {
        required.iter().all(|f| self.fields.contains_key(*f))
    }

    /// Deserialize the known fields into `T`
    ///
    /// Fails when `T` requires a field the record does not have yet.
    pub fn to_typed<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }

    /// Restore previously captured values for `names`
    ///
    /// `None` removes the field. Used to roll back a failed optimistic patch.
    pub(crate) fn restore(&mut self, previous: Vec<(String, Option<Value>)>) {
        for (name, value) in previous {
            if name == "id" {
                continue;
            }
            match value {
                Some(v) => {
                    self.fields.insert(name, v);
                }
                None => {
                    self.fields.remove(&name);
                }
            }
        }
        self.metadata.updated_at = Utc::now();
        self.metadata.version += 1;
    }
}

/// Metadata associated with an entity record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// When the record was first normalized
    pub created_at: DateTime<Utc>,

    /// Last merge time
    pub updated_at: DateTime<Utc>,

    /// Number of merges applied (incremented on updates)
    pub version: u64,
}
