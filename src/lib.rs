//! # Unreal Query (unreal-query)
//!
//! The client-side data layer of the Unreal AI-media app: request
//! deduplication plus a normalized entity cache shared by every
//! data-fetching call site (feed, comments, profiles, likes, follows).
//!
//! ## Features
//!
//! - At most one in-flight backend request per key; every concurrent caller
//!   gets the same outcome, failures included
//! - Field-level merge of partially-known entities, last write wins per field
//! - Read-through entity, field and list fetches
//! - Optimistic updates with rollback
//! - Async-first design using tokio
//!
//! ## Request Deduplication
//!
//! ```no_run
//! use unreal_query::{QueryError, RequestDeduplicator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dedup: RequestDeduplicator<String> = RequestDeduplicator::new();
//!
//!     let (a, b) = tokio::join!(
//!         dedup.deduped_request("authorImage-u1", || async {
//!             Ok::<_, QueryError>("https://cdn.example/u1.png".to_string())
//!         }),
//!         dedup.deduped_request("authorImage-u1", || async {
//!             Ok::<_, QueryError>(unreachable!("joined the first request"))
//!         }),
//!     );
//!     assert_eq!(a?, b?);
//!     Ok(())
//! }
//! ```
//!
//! ## Normalized Entities
//!
//! ```no_run
//! use unreal_query::{NormalizedEntityStore, QueryConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = NormalizedEntityStore::new(QueryConfig::default());
//!
//!     store.normalize_entity("users", &json!({"id": "u1", "avatar_url": "a"})).await?;
//!     store.normalize_entity("users", &json!({"id": "u1", "username": "bob"})).await?;
//!
//!     let user = store.get_entity("users", "u1").await.expect("normalized above");
//!     assert_eq!(user.get_str("avatar_url"), Some("a"));
//!     assert_eq!(user.get_str("username"), Some("bob"));
//!     Ok(())
//! }
//! ```
//!
//! ## Query Client
//!
//! ```no_run
//! use unreal_query::{QueryClient, QueryConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     unreal_query::logging::init_tracing("unreal_query=debug")?;
//!     let client = QueryClient::new(QueryConfig::from_env()?);
//!
//!     let post = client
//!         .fetch_entity("posts", "p1", &["image_url"], || async {
//!             Ok(json!({"id": "p1", "image_url": "https://cdn.example/p1.webp"}))
//!         })
//!         .await?;
//!     println!("{}", post.get_str("image_url").unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use cache::{
    Collection, DedupStats, EntityFields, EntityMetadata, EntityRecord, NormalizedEntityStore,
    QueryClient, QueryConfig, QueryConfigBuilder, RequestDeduplicator, RequestKey,
    RequestKeyBuilder, StoreStats,
};
pub use error::{QueryError, Result};
