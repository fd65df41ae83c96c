//! Normalized entity store with field-level merge semantics

use crate::cache::{
    config::QueryConfig,
    entry::EntityRecord,
    types::{EntityFields, StoreStats},
};
use crate::error::{QueryError, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Shared cache of partially-known entities keyed by `(collection, id)`
///
/// This implementation provides:
/// - Thread-safe async access via RwLock; lookups only take the read lock
/// - Merge-on-write: a write never drops fields it does not mention
/// - Last-write-wins per field
/// - No expiration; records live until [`NormalizedEntityStore::clear`]
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Clone)]
pub struct NormalizedEntityStore {
    config: Arc<QueryConfig>,
    store: Arc<RwLock<EntityStore>>,
    lookups: Arc<LookupCounters>,
}

/// Lookup counters, kept outside the lock so reads never need the write guard
#[derive(Default)]
struct LookupCounters {
    reads: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Internal storage
#[derive(Default)]
struct EntityStore {
    /// collection -> id -> record
    collections: HashMap<String, HashMap<String, EntityRecord>>,

    stats: StoreStats,
}

impl EntityStore {
    fn record_count(&self) -> usize {
        self.collections.values().map(HashMap::len).sum()
    }
}

/// Field values replaced by an optimistic patch, kept for rollback
#[derive(Debug, Clone)]
pub(crate) struct AppliedPatch {
    collection: String,
    id: String,
    /// (field, value written by the patch, value before the patch)
    fields: Vec<(String, Value, Option<Value>)>,
}

impl NormalizedEntityStore {
    /// Create an empty store
    pub fn new(config: QueryConfig) -> Self {
        Self::with_shared_config(Arc::new(config))
    }

    pub(crate) fn with_shared_config(config: Arc<QueryConfig>) -> Self {
        info!("Initializing normalized entity store with config: {:?}", config);

        Self {
            config,
            store: Arc::new(RwLock::new(EntityStore::default())),
            lookups: Arc::new(LookupCounters::default()),
        }
    }

    /// Merge a serializable entity into `(collection, entity.id)`
    ///
    /// The entity must serialize to a JSON object with a non-empty `id`
    /// (string or number). Fields present overwrite, fields absent are kept.
    pub async fn normalize_entity<T: Serialize + ?Sized>(
        &self,
        collection: impl AsRef<str>,
        entity: &T,
    ) -> Result<()> {
        let collection = collection.as_ref();
        let value = serde_json::to_value(entity)?;
        let (id, fields) = split_entity(collection, value)?;
        self.normalize_fields(collection, &id, fields).await
    }

    /// Merge a field map into `(collection, id)`, creating the record if absent
    pub async fn normalize_fields(
        &self,
        collection: impl AsRef<str>,
        id: &str,
        fields: EntityFields,
    ) -> Result<()> {
        let collection = collection.as_ref();
        if id.is_empty() {
            warn!("Rejected entity with empty id for collection: {}", collection);
            return Err(invalid(collection, "id must not be empty"));
        }

        let mut store = self.store.write().await;
        merge_locked(&mut store, collection, id, fields);
        if self.config.enable_metrics {
            store.stats.merges += 1;
        }

        debug!("Normalized entity: {}/{}", collection, id);
        Ok(())
    }

    /// Current merged record for `(collection, id)`, or `None` if never normalized
    pub async fn get_entity(&self, collection: impl AsRef<str>, id: &str) -> Option<EntityRecord> {
        let collection = collection.as_ref();
        let found = {
            let store = self.store.read().await;
            store
                .collections
                .get(collection)
                .and_then(|records| records.get(id))
                .cloned()
        };

        if self.config.enable_metrics {
            self.lookups.reads.fetch_add(1, Ordering::Relaxed);
            let outcome = if found.is_some() {
                &self.lookups.hits
            } else {
                &self.lookups.misses
            };
            outcome.fetch_add(1, Ordering::Relaxed);
        }

        if found.is_some() && self.config.log_cache_hits {
            debug!("Entity store hit: {}/{}", collection, id);
        }

        found
    }

    /// Typed view of a record
    ///
    /// Returns `Ok(None)` when the record is unknown and a serialization error
    /// when it lacks a field `T` requires.
    pub async fn get_entity_as<T: DeserializeOwned>(
        &self,
        collection: impl AsRef<str>,
        id: &str,
    ) -> Result<Option<T>> {
        match self.get_entity(collection, id).await {
            Some(record) => Ok(Some(record.to_typed()?)),
            None => Ok(None),
        }
    }

    /// Check if a record exists (without touching stats)
    pub async fn contains(&self, collection: impl AsRef<str>, id: &str) -> bool {
        let store = self.store.read().await;
        store
            .collections
            .get(collection.as_ref())
            .is_some_and(|records| records.contains_key(id))
    }

    /// Ids known in a collection, sorted
    pub async fn ids(&self, collection: impl AsRef<str>) -> Vec<String> {
        let store = self.store.read().await;
        let mut ids: Vec<String> = store
            .collections
            .get(collection.as_ref())
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Number of records in one collection
    pub async fn collection_len(&self, collection: impl AsRef<str>) -> usize {
        let store = self.store.read().await;
        store.collections.get(collection.as_ref()).map_or(0, HashMap::len)
    }

    /// Total number of records
    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.record_count()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get store statistics
    pub async fn stats(&self) -> StoreStats {
        let store = self.store.read().await;
        let mut stats = store.stats.clone();
        stats.records = store.record_count();
        stats.collections = store.collections.values().filter(|r| !r.is_empty()).count();
        stats.reads = self.lookups.reads.load(Ordering::Relaxed);
        stats.hits = self.lookups.hits.load(Ordering::Relaxed);
        stats.misses = self.lookups.misses.load(Ordering::Relaxed);
        stats
    }

    /// Drop every record, e.g. on logout
    pub async fn clear(&self) {
        let mut store = self.store.write().await;
        let count = store.record_count();
        store.collections.clear();
        info!("Cleared {} records from entity store", count);
    }

    /// Merge `patch` and remember what it replaced
    pub(crate) async fn apply_patch(
        &self,
        collection: &str,
        id: &str,
        patch: EntityFields,
    ) -> Result<AppliedPatch> {
        if id.is_empty() {
            return Err(invalid(collection, "id must not be empty"));
        }

        let mut store = self.store.write().await;
        let existing = store
            .collections
            .get(collection)
            .and_then(|records| records.get(id));

        let fields = patch
            .iter()
            .filter(|(name, _)| name.as_str() != "id")
            .map(|(name, value)| {
                let previous = existing.and_then(|r| r.fields.get(name)).cloned();
                (name.clone(), value.clone(), previous)
            })
            .collect();

        merge_locked(&mut store, collection, id, patch);
        if self.config.enable_metrics {
            store.stats.merges += 1;
        }

        Ok(AppliedPatch {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        })
    }

    /// Undo a patch, skipping fields another writer has changed since
    pub(crate) async fn revert_patch(&self, applied: AppliedPatch) -> usize {
        let mut store = self.store.write().await;
        let Some(record) = store
            .collections
            .get_mut(&applied.collection)
            .and_then(|records| records.get_mut(&applied.id))
        else {
            return 0;
        };

        let to_restore: Vec<(String, Option<Value>)> = applied
            .fields
            .into_iter()
            .filter(|(name, written, _)| record.fields.get(name) == Some(written))
            .map(|(name, _, previous)| (name, previous))
            .collect();

        let restored = to_restore.len();
        if restored > 0 {
            record.restore(to_restore);
        }

        debug!(
            "Reverted {} field(s) on {}/{}",
            restored, applied.collection, applied.id
        );
        restored
    }
}

fn merge_locked(store: &mut EntityStore, collection: &str, id: &str, fields: EntityFields) {
    store
        .collections
        .entry(collection.to_string())
        .or_default()
        .entry(id.to_string())
        .or_insert_with(|| EntityRecord::new(collection, id))
        .merge(fields);
}

fn invalid(collection: &str, reason: &str) -> QueryError {
    QueryError::InvalidEntity {
        collection: collection.to_string(),
        reason: reason.to_string(),
    }
}

/// Split a serialized entity into its id and field map
pub(crate) fn split_entity(collection: &str, value: Value) -> Result<(String, EntityFields)> {
    let Value::Object(fields) = value else {
        warn!("Rejected non-object entity for collection: {}", collection);
        return Err(invalid(collection, "entity must be a JSON object"));
    };

    let id = match fields.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(_)) => {
            warn!("Rejected entity with empty id for collection: {}", collection);
            return Err(invalid(collection, "id must not be empty"));
        }
        Some(_) => {
            warn!("Rejected entity with non-scalar id for collection: {}", collection);
            return Err(invalid(collection, "id must be a string or number"));
        }
        None => {
            warn!("Rejected entity without id for collection: {}", collection);
            return Err(invalid(collection, "missing id field"));
        }
    };

    Ok((id, fields))
}
