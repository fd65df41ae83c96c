//! Demonstrates several screens sharing one query client
//!
//! This example shows how:
//! - A feed page normalizes posts
//! - Post cards rendering at once share a single author lookup
//! - A profile header reuses what the cards learned
//! - A failed like is rolled back

use serde_json::json;
use std::time::Duration;
use unreal_query::{Collection, QueryClient, QueryConfig, QueryError, RequestKeyBuilder};

async fn backend_author(id: String) -> unreal_query::Result<serde_json::Value> {
    tokio::time::sleep(Duration::from_millis(40)).await;
    println!("   backend: loaded author {}", id);
    Ok(json!({"id": id, "avatar_url": "https://cdn.example/u1.png"}))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    unreal_query::logging::init_tracing("unreal_query=debug")?;

    let client = QueryClient::new(QueryConfig::from_env()?);

    println!("1. Loading feed...");
    let feed_key = RequestKeyBuilder::new("feed").param("page", "1").build();
    let posts = client
        .fetch_list(feed_key, Collection::Posts, || async {
            Ok(json!([
                {"id": "p1", "prompt": "neon koi pond", "author_id": "u1", "like_count": 7},
                {"id": "p2", "prompt": "glass city at dusk", "author_id": "u1", "like_count": 2}
            ]))
        })
        .await?;
    for post in &posts {
        println!("   {} - {}", post.id, post.get_str("prompt").unwrap_or_default());
    }

    println!("\n2. Rendering post cards...");
    let cards = posts.iter().map(|post| {
        let author = post.get_str("author_id").unwrap_or_default().to_string();
        let client = client.clone();
        async move {
            let id = author.clone();
            client
                .fetch_field("users", &author, "avatar_url", move || backend_author(id))
                .await
        }
    });
    for avatar in futures::future::join_all(cards).await {
        println!("   avatar: {}", avatar?.unwrap_or_default());
    }

    println!("\n3. Rendering profile header...");
    let profile = client
        .fetch_entity("users", "u1", &["avatar_url"], || async {
            Err(QueryError::Fetch("already cached".to_string()))
        })
        .await?;
    println!("   header avatar: {}", profile.get_str("avatar_url").unwrap_or_default());

    println!("\n4. Liking a post while offline...");
    let liked = client
        .optimistic_update("posts", "p1", &json!({"like_count": 8, "liked_by_me": true}), || async {
            Err(QueryError::Fetch("network unreachable".to_string()))
        })
        .await;
    println!("   like failed: {}", liked.is_err());
    let post = client.store().get_entity("posts", "p1").await;
    println!(
        "   like_count after rollback: {}",
        post.and_then(|p| p.get("like_count").cloned()).unwrap_or_default()
    );

    println!("\n{}", client.store_stats().await);
    println!("{}", client.dedup_stats().await);

    Ok(())
}
