//! Hook-facing query client
//!
//! Glues the request deduplicator and the entity store together the way the
//! app's data-fetching call sites use them:
//! - read-through entity fetches (store first, then one deduplicated fetch)
//! - single-field lookups such as an author's avatar
//! - list fetches that normalize every returned entity
//! - optimistic mutations with rollback

use crate::cache::{
    config::QueryConfig,
    dedup::RequestDeduplicator,
    entry::EntityRecord,
    store::{split_entity, NormalizedEntityStore},
    types::{DedupStats, EntityFields, RequestKey, StoreStats},
};
use crate::error::{QueryError, Result};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Request key builder
///
/// `RequestKeyBuilder::new("authorImage").id("u1").build()` yields
/// `authorImage-u1`.
pub struct RequestKeyBuilder {
    prefix: String,
    identifier: Option<String>,
    params: Vec<(String, String)>,
}

impl RequestKeyBuilder {
    /// Create a new request key builder
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            identifier: None,
            params: Vec::new(),
        }
    }

    /// Set the entity identifier
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.identifier = Some(id.into());
        self
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add the requested field set; order-insensitive
    pub fn fields(self, fields: &[&str]) -> Self {
        if fields.is_empty() {
            return self;
        }
        let mut sorted: Vec<&str> = fields.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        self.param("fields", sorted.join(","))
    }

    /// Build the request key
    pub fn build(self) -> RequestKey {
        let mut key = self.prefix;

        if let Some(id) = self.identifier {
            key.push('-');
            key.push_str(&id);
        }

        if !self.params.is_empty() {
            let params_str: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push('?');
            key.push_str(&params_str.join("&"));
        }

        key
    }
}

/// Shared query client handed to every data-fetching call site
///
/// Cloning is cheap; all clones share one store and one request registry.
#[derive(Clone)]
pub struct QueryClient {
    config: Arc<QueryConfig>,
    store: NormalizedEntityStore,
    requests: RequestDeduplicator<Value>,
}

impl QueryClient {
    /// Create a new query client
    pub fn new(config: QueryConfig) -> Self {
        info!("Initializing query client with config: {:?}", config);
        let config = Arc::new(config);

        Self {
            store: NormalizedEntityStore::with_shared_config(config.clone()),
            requests: RequestDeduplicator::with_metrics(config.enable_metrics),
            config,
        }
    }

    /// Create a client from `UNREAL_QUERY_*` environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(QueryConfig::from_env()?))
    }

    /// Get the underlying entity store
    pub fn store(&self) -> &NormalizedEntityStore {
        &self.store
    }

    /// Get the underlying request deduplicator
    pub fn requests(&self) -> &RequestDeduplicator<Value> {
        &self.requests
    }

    /// Get the active configuration
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Deduplicate an arbitrary backend call returning JSON
    pub async fn deduped_request<F, Fut>(&self, key: impl Into<RequestKey>, factory: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let key = key.into();
        let timeout = self.config.fetch_timeout;
        let timeout_key = key.clone();
        self.requests
            .deduped_request(key, move || with_timeout(timeout, timeout_key, factory()))
            .await
    }

    /// Read-through fetch of one entity
    ///
    /// Served from the store when the cached record already has every field in
    /// `required_fields` (any cached record when empty). Otherwise `fetcher`
    /// runs once for all concurrent callers asking for the same fields, and its
    /// JSON object is merged into the store. A fetched object without `id` is
    /// attributed to `id`.
    pub async fn fetch_entity<F, Fut>(
        &self,
        collection: impl AsRef<str>,
        id: &str,
        required_fields: &[&str],
        fetcher: F,
    ) -> Result<EntityRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let collection = collection.as_ref();
        if let Some(record) = self.cached_with(collection, id, required_fields).await {
            return Ok(record);
        }

        let key = RequestKeyBuilder::new(collection)
            .id(id)
            .fields(required_fields)
            .build();
        debug!("Entity cache miss, fetching: {}", key);

        let store = self.store.clone();
        let collection_owned = collection.to_string();
        let id_owned = id.to_string();

        self.deduped_request(key, move || {
            let fetch = fetcher();
            async move {
                let value = fetch.await?;
                let fields = entity_fields(&collection_owned, &id_owned, value.clone())?;
                store.normalize_fields(&collection_owned, &id_owned, fields).await?;
                Ok(value)
            }
        })
        .await?;

        self.store
            .get_entity(collection, id)
            .await
            .ok_or_else(|| QueryError::Other(format!("{}/{} vanished after fetch", collection, id)))
    }

    /// Fetch a single attribute, e.g. a comment author's avatar
    ///
    /// Returns `Ok(None)` when the backend answered without that field.
    pub async fn fetch_field<F, Fut>(
        &self,
        collection: impl AsRef<str>,
        id: &str,
        field: &str,
        fetcher: F,
    ) -> Result<Option<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let record = self.fetch_entity(collection, id, &[field], fetcher).await?;
        Ok(record.get(field).cloned())
    }

    /// Fetch a list (feed page, comment thread) and normalize every entity in it
    ///
    /// `fetcher` must yield a JSON array of objects carrying `id`. Records are
    /// returned in the order the backend listed them. A page with any malformed
    /// item is rejected whole and nothing from it is stored.
    pub async fn fetch_list<F, Fut>(
        &self,
        key: impl Into<RequestKey>,
        collection: impl AsRef<str>,
        fetcher: F,
    ) -> Result<Vec<EntityRecord>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let collection = collection.as_ref();
        let store = self.store.clone();
        let collection_owned = collection.to_string();

        let listed = self
            .deduped_request(key, move || {
                let fetch = fetcher();
                async move {
                    let value = fetch.await?;
                    let Value::Array(items) = value else {
                        return Err(QueryError::InvalidEntity {
                            collection: collection_owned,
                            reason: "list fetch must return a JSON array".to_string(),
                        });
                    };

                    let entities = items
                        .into_iter()
                        .map(|item| split_entity(&collection_owned, item))
                        .collect::<Result<Vec<_>>>()?;

                    let mut ids = Vec::with_capacity(entities.len());
                    for (id, fields) in entities {
                        store.normalize_fields(&collection_owned, &id, fields).await?;
                        ids.push(Value::String(id));
                    }
                    Ok(Value::Array(ids))
                }
            })
            .await?;

        let mut records = Vec::new();
        if let Value::Array(ids) = listed {
            for id in ids.iter().filter_map(Value::as_str) {
                if let Some(record) = self.store.get_entity(collection, id).await {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Apply `patch` immediately, then confirm it with `mutation`
    ///
    /// Every reader sees the patch at once. If `mutation` succeeds, any JSON
    /// object it returns is merged as the authoritative state. If it fails, the
    /// patched fields go back to their previous values (fields unknown before
    /// are removed), except fields another writer changed in the meantime, and
    /// the error is returned.
    pub async fn optimistic_update<P, F, Fut>(
        &self,
        collection: impl AsRef<str>,
        id: &str,
        patch: &P,
        mutation: F,
    ) -> Result<EntityRecord>
    where
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Value>>>,
    {
        let collection = collection.as_ref();
        let patch = entity_fields(collection, id, serde_json::to_value(patch)?)?;
        let applied = self.store.apply_patch(collection, id, patch).await?;
        debug!("Applied optimistic patch to {}/{}", collection, id);

        let key = RequestKeyBuilder::new(collection).id(id).param("mutation", "optimistic").build();
        match with_timeout(self.config.fetch_timeout, key, mutation()).await {
            Ok(Some(confirmed)) => {
                let fields = entity_fields(collection, id, confirmed)?;
                self.store.normalize_fields(collection, id, fields).await?;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Optimistic update of {}/{} failed, reverting: {}", collection, id, e);
                self.store.revert_patch(applied).await;
                return Err(e);
            }
        }

        self.store
            .get_entity(collection, id)
            .await
            .ok_or_else(|| QueryError::Other(format!("{}/{} vanished after update", collection, id)))
    }

    /// Get entity store statistics
    pub async fn store_stats(&self) -> StoreStats {
        self.store.stats().await
    }

    /// Get request deduplication statistics
    pub async fn dedup_stats(&self) -> DedupStats {
        self.requests.stats().await
    }

    /// Drop every cached entity, e.g. on logout
    pub async fn clear(&self) {
        self.store.clear().await
    }

    async fn cached_with(&self, collection: &str, id: &str, required: &[&str]) -> Option<EntityRecord> {
        self.store
            .get_entity(collection, id)
            .await
            .filter(|record| record.has_fields(required))
    }
}

/// Turn a fetched JSON object into fields for `(collection, id)`
fn entity_fields(collection: &str, id: &str, value: Value) -> Result<EntityFields> {
    let Value::Object(mut fields) = value else {
        return Err(QueryError::InvalidEntity {
            collection: collection.to_string(),
            reason: "entity must be a JSON object".to_string(),
        });
    };

    match fields.get("id") {
        None => {
            fields.insert("id".to_string(), Value::String(id.to_string()));
        }
        Some(Value::String(s)) if s == id => {}
        Some(Value::Number(n)) if n.to_string() == id => {}
        Some(other) => {
            return Err(QueryError::InvalidEntity {
                collection: collection.to_string(),
                reason: format!("id {} does not match requested id {}", other, id),
            });
        }
    }

    Ok(fields)
}

async fn with_timeout<T, Fut>(timeout: Option<Duration>, key: RequestKey, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
            Err(QueryError::Timeout {
                timeout_ms: millis(limit),
                key,
            })
        }),
        None => fut.await,
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
