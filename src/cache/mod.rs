//! # Client Query Cache
//!
//! This module implements the data-layer core shared by the app's
//! data-fetching call sites.
//!
//! ## Features
//!
//! - **Request Deduplication**: concurrent requests for one key run a single backend call
//! - **Normalized Entities**: one merged record per `(collection, id)`, filled in by any caller
//! - **Read-Through Fetches**: store first, deduplicated fetch on miss, result merged back
//! - **Optimistic Updates**: patches visible immediately, rolled back on failure
//!
//! ## Example
//!
//! ```rust
//! use unreal_query::cache::{QueryClient, QueryConfig};
//! use serde_json::json;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = QueryClient::new(QueryConfig::default());
//!
//! // A comment list learns the author's avatar...
//! client
//!     .store()
//!     .normalize_entity("users", &json!({"id": "u1", "avatar_url": "a.png"}))
//!     .await?;
//!
//! // ...and the profile header reuses it without a fetch
//! let avatar = client
//!     .fetch_field("users", "u1", "avatar_url", || async { Ok(json!({})) })
//!     .await?;
//! assert_eq!(avatar, Some(json!("a.png")));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dedup;
pub mod entry;
pub mod integration;
pub mod store;
pub mod types;

pub use config::{QueryConfig, QueryConfigBuilder};
pub use dedup::RequestDeduplicator;
pub use entry::{EntityMetadata, EntityRecord};
pub use integration::{QueryClient, RequestKeyBuilder};
pub use store::NormalizedEntityStore;
pub use types::{Collection, DedupStats, EntityFields, RequestKey, StoreStats};
