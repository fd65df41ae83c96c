//! Integration tests for the query layer
//!
//! These tests verify the public behaviour call sites rely on:
//! - At most one in-flight request per key
//! - Fresh requests after settlement
//! - Failure propagation and registry clearing
//! - Merge and last-write-wins normalization
//! - Read-through fetches shared between independent call sites
//! - Environment configuration

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use unreal_query::cache::config::{ENV_ENABLE_METRICS, ENV_FETCH_TIMEOUT_MS, ENV_LOG_CACHE_HITS};
use unreal_query::{
    Collection, NormalizedEntityStore, QueryClient, QueryConfig, QueryError, RequestDeduplicator,
    RequestKeyBuilder,
};

#[tokio::test]
async fn test_at_most_one_inflight_per_key() {
    let dedup: RequestDeduplicator<String> = RequestDeduplicator::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let callers = (0..25).map(|_| {
        let calls = calls.clone();
        dedup.deduped_request("authorImage-u1", move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok("https://cdn.example/u1.png".to_string())
            }
        })
    });

    let results = join_all(callers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(results.len(), 25);
    for result in results {
        assert_eq!(result.unwrap(), "https://cdn.example/u1.png");
    }
}

#[tokio::test]
async fn test_reentrant_after_settlement() {
    let dedup: RequestDeduplicator<u32> = RequestDeduplicator::new();
    let f2_calls = Arc::new(AtomicUsize::new(0));

    let first = dedup.deduped_request("credits-u1", || async { Ok(10) }).await;
    assert_eq!(first, Ok(10));

    let counter = f2_calls.clone();
    let second = dedup
        .deduped_request("credits-u1", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(20) }
        })
        .await;

    assert_eq!(second, Ok(20));
    assert_eq!(f2_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failure_propagation_then_recovery() {
    let dedup: RequestDeduplicator<u32> = RequestDeduplicator::new();

    let failing = (0..5).map(|_| {
        dedup.deduped_request("k", || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(QueryError::Fetch("boom".to_string()))
        })
    });

    for result in join_all(failing).await {
        let err = result.unwrap_err();
        assert_eq!(err, QueryError::Fetch("boom".to_string()));
        assert!(err.to_string().contains("boom"));
    }

    assert!(!dedup.is_pending("k").await);
    assert_eq!(dedup.deduped_request("k", || async { Ok(3) }).await, Ok(3));

    let stats = dedup.stats().await;
    assert_eq!(stats.factory_invocations, 2);
    assert_eq!(stats.joined, 4);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test]
async fn test_merge_not_replace() {
    let store = NormalizedEntityStore::new(QueryConfig::default());

    store
        .normalize_entity("users", &json!({"id": "u1", "avatar_url": "a"}))
        .await
        .unwrap();
    store
        .normalize_entity("users", &json!({"id": "u1", "username": "bob"}))
        .await
        .unwrap();

    let record = store.get_entity("users", "u1").await.unwrap();
    assert_eq!(
        serde_json::Value::Object(record.fields),
        json!({"id": "u1", "avatar_url": "a", "username": "bob"})
    );
}

#[tokio::test]
async fn test_last_write_wins_per_field() {
    let store = NormalizedEntityStore::new(QueryConfig::default());

    store
        .normalize_entity("users", &json!({"id": "u1", "avatar_url": "a"}))
        .await
        .unwrap();
    store
        .normalize_entity("users", &json!({"id": "u1", "avatar_url": "b"}))
        .await
        .unwrap();

    let record = store.get_entity("users", "u1").await.unwrap();
    assert_eq!(record.get_str("avatar_url"), Some("b"));
}

#[tokio::test]
async fn test_unknown_key_returns_none() {
    let store = NormalizedEntityStore::new(QueryConfig::default());
    assert!(store.get_entity("posts", "nonexistent").await.is_none());
    assert!(store
        .get_entity_as::<serde_json::Value>("posts", "nonexistent")
        .await
        .unwrap()
        .is_none());
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Post {
    id: String,
    prompt: String,
    image_url: String,
    author_id: String,
}

#[tokio::test]
async fn test_feed_and_profile_share_author_data() {
    let client = QueryClient::new(QueryConfig::default());
    let backend_calls = Arc::new(AtomicUsize::new(0));

    // Feed page lists posts
    let feed_key = RequestKeyBuilder::new("feed").param("page", "1").build();
    let posts = client
        .fetch_list(feed_key, Collection::Posts, || async {
            Ok(json!([
                {"id": "p1", "prompt": "neon koi", "image_url": "p1.webp", "author_id": "u1"},
                {"id": "p2", "prompt": "glass city", "image_url": "p2.webp", "author_id": "u1"}
            ]))
        })
        .await
        .unwrap();
    assert_eq!(posts.len(), 2);

    let typed: Post = posts[0].to_typed().unwrap();
    assert_eq!(typed.prompt, "neon koi");

    // Two post cards render at once and both need the author's avatar
    let avatars = (0..2).map(|_| {
        let calls = backend_calls.clone();
        client.fetch_field("users", "u1", "avatar_url", move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(json!({"avatar_url": "u1.png"}))
            }
        })
    });
    for avatar in join_all(avatars).await {
        assert_eq!(avatar.unwrap(), Some(json!("u1.png")));
    }
    assert_eq!(backend_calls.load(Ordering::SeqCst), 1);

    // Profile header needs the username too; avatar is kept after the merge
    let profile = client
        .fetch_entity("users", "u1", &["username", "avatar_url"], || async {
            Ok(json!({"id": "u1", "username": "bob"}))
        })
        .await
        .unwrap();
    assert_eq!(profile.get_str("avatar_url"), Some("u1.png"));
    assert_eq!(profile.get_str("username"), Some("bob"));

    // Header re-render is a pure store hit
    client
        .fetch_entity("users", "u1", &["username"], || async {
            Err(QueryError::Fetch("unexpected fetch".to_string()))
        })
        .await
        .unwrap();

    let store_stats = client.store_stats().await;
    assert_eq!(store_stats.records, 3);
    assert_eq!(store_stats.collections, 2);

    let dedup_stats = client.dedup_stats().await;
    assert_eq!(dedup_stats.factory_invocations, 3);
    assert_eq!(dedup_stats.joined, 1);
}

#[tokio::test]
async fn test_optimistic_like_rolls_back_on_failure() {
    let client = QueryClient::new(QueryConfig::default());
    client
        .store()
        .normalize_entity("posts", &json!({"id": "p1", "like_count": 7}))
        .await
        .unwrap();

    let result = client
        .optimistic_update(
            "posts",
            "p1",
            &json!({"like_count": 8, "liked_by_me": true}),
            || async { Err(QueryError::Fetch("row level security".to_string())) },
        )
        .await;
    assert!(result.is_err());

    let post = client.store().get_entity("posts", "p1").await.unwrap();
    assert_eq!(post.get("like_count"), Some(&json!(7)));
    assert!(post.get("liked_by_me").is_none());
}

#[tokio::test]
async fn test_shared_client_across_tasks() {
    let client = QueryClient::new(QueryConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let client = client.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            client
                .fetch_entity("posts", "p9", &[], move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!({"prompt": "aurora"}))
                    }
                })
                .await
        }));
    }

    for handle in handles {
        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.get_str("prompt"), Some("aurora"));
    }

    // Tasks that started after the first fetch settled are store hits
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_abandoned_fetch_still_fills_store() {
    let client = QueryClient::new(QueryConfig::default());

    // The call site unmounts before the backend answers
    let abandoned = tokio::time::timeout(
        Duration::from_millis(5),
        client.fetch_entity(Collection::Users, "u1", &["avatar_url"], || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(json!({"avatar_url": "u1.png"}))
        }),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;

    let user = client.store().get_entity(Collection::Users, "u1").await.unwrap();
    assert_eq!(user.get_str("avatar_url"), Some("u1.png"));
    assert_eq!(client.requests().pending_count().await, 0);
}

#[test]
fn test_config_from_env() {
    std::env::set_var(ENV_FETCH_TIMEOUT_MS, "1500");
    std::env::set_var(ENV_ENABLE_METRICS, "false");
    std::env::set_var(ENV_LOG_CACHE_HITS, "yes");

    let config = QueryConfig::from_env().unwrap();
    assert_eq!(config.fetch_timeout, Some(Duration::from_millis(1500)));
    assert!(!config.enable_metrics);
    assert!(config.log_cache_hits);

    std::env::set_var(ENV_FETCH_TIMEOUT_MS, "soon");
    assert!(matches!(QueryConfig::from_env(), Err(QueryError::Config(_))));

    std::env::remove_var(ENV_FETCH_TIMEOUT_MS);
    std::env::remove_var(ENV_ENABLE_METRICS);
    std::env::remove_var(ENV_LOG_CACHE_HITS);

    assert_eq!(QueryConfig::from_env().unwrap(), QueryConfig::default());
}
