//! Request deduplication for concurrent identical backend calls
//!
//! Any number of callers asking for the same key while a request is in
//! flight share its single outcome. Once the request settles its key is
//! released, so the next call starts a fresh request.

use crate::cache::types::{DedupStats, RequestKey};
use crate::error::QueryError;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

type SharedRequest<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Collapses concurrent requests sharing a key into one underlying call
///
/// - The lookup and the registration of a new request happen under one lock,
///   so two callers can never both start a request for the same key.
/// - A settled request is removed before any caller sees its outcome.
/// - Errors are handed to every joined caller unchanged.
/// - A request runs on the Tokio runtime as soon as it is registered and
///   keeps running when every caller stops waiting. Its key is released when
///   it settles, attached callers or not.
/// - There is no retry, timeout or cancellation.
///
/// Must be used from within a Tokio runtime. Cloning yields a handle to the
/// same registry.
pub struct RequestDeduplicator<T, E = QueryError> {
    inner: Arc<DedupInner<T, E>>,
}

struct DedupInner<T, E> {
    registry: Mutex<Registry<T, E>>,
    enable_metrics: bool,
}

struct Registry<T, E> {
    pending: HashMap<RequestKey, SharedRequest<T, E>>,
    stats: DedupStats,
}

impl<T, E> Clone for RequestDeduplicator<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Default for RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a deduplicator with metrics enabled
    pub fn new() -> Self {
        Self::with_metrics(true)
    }

    /// Create a deduplicator, optionally skipping stats bookkeeping
    pub fn with_metrics(enable_metrics: bool) -> Self {
        Self {
            inner: Arc::new(DedupInner {
                registry: Mutex::new(Registry {
                    pending: HashMap::new(),
                    stats: DedupStats::default(),
                }),
                enable_metrics,
            }),
        }
    }

    /// Run `factory` for `key` unless a request for `key` is already in flight
    ///
    /// `factory` is invoked at most once per in-flight period, while the
    /// registry lock is held, and its future is spawned right away. Callers
    /// that find a pending request join it and `factory` is dropped without
    /// being called. Dropping the returned future only detaches this caller.
    pub async fn deduped_request<F, Fut>(&self, key: impl Into<RequestKey>, factory: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();

        let request = {
            let mut registry = self.inner.registry.lock().await;
            if self.inner.enable_metrics {
                registry.stats.requests += 1;
            }

            if let Some(pending) = registry.pending.get(&key) {
                let pending = pending.clone();
                if self.inner.enable_metrics {
                    registry.stats.joined += 1;
                }
                debug!("Joining in-flight request: {}", key);
                pending
            } else {
                let request_id = Uuid::new_v4();
                debug!("Starting request {} ({})", key, request_id);

                let request = settle_then_release(
                    Arc::downgrade(&self.inner),
                    key.clone(),
                    request_id,
                    factory(),
                )
                .boxed()
                .shared();

                // Drive to settlement even if every caller goes away
                tokio::spawn(request.clone());

                registry.pending.insert(key, request.clone());
                if self.inner.enable_metrics {
                    registry.stats.factory_invocations += 1;
                }
                request
            }
        };

        request.await
    }

    /// Check whether a request for `key` is in flight
    pub async fn is_pending(&self, key: &str) -> bool {
        let registry = self.inner.registry.lock().await;
        registry.pending.contains_key(key)
    }

    /// Number of in-flight requests
    pub async fn pending_count(&self) -> usize {
        let registry = self.inner.registry.lock().await;
        registry.pending.len()
    }

    /// Keys of in-flight requests, sorted
    pub async fn pending_keys(&self) -> Vec<RequestKey> {
        let registry = self.inner.registry.lock().await;
        let mut keys: Vec<RequestKey> = registry.pending.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Get deduplication statistics
    pub async fn stats(&self) -> DedupStats {
        let registry = self.inner.registry.lock().await;
        registry.stats.clone()
    }
}

/// Await the factory's future, then drop its registry entry before yielding the outcome
async fn settle_then_release<T, E, Fut>(
    inner: Weak<DedupInner<T, E>>,
    key: RequestKey,
    request_id: Uuid,
    request: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let outcome = request.await;

    if let Some(inner) = inner.upgrade() {
        let mut registry = inner.registry.lock().await;
        registry.pending.remove(&key);
        if inner.enable_metrics {
            match &outcome {
                Ok(_) => registry.stats.succeeded += 1,
                Err(_) => registry.stats.failed += 1,
            }
        }
    }

    match &outcome {
        Ok(_) => debug!("Request {} ({}) settled", key, request_id),
        Err(_) => warn!("Request {} ({}) failed", key, request_id),
    }

    outcome
}
