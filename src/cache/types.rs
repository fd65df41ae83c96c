//! Core type definitions for the query layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Request key type - identifies one logical backend request
pub type RequestKey = String;

/// Entity field map - attribute name to JSON value
pub type EntityFields = serde_json::Map<String, serde_json::Value>;

/// Statistics for the request deduplicator
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Total number of `deduped_request` calls
    pub requests: u64,

    /// Number of times a factory was actually invoked
    pub factory_invocations: u64,

    /// Number of calls that joined an in-flight request
    pub joined: u64,

    /// Number of computations that settled successfully
    pub succeeded: u64,

    /// Number of computations that settled with an error
    pub failed: u64,
}

impl DedupStats {
    /// Share of requests served by joining an in-flight computation, as a percentage
    pub fn dedup_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            (self.joined as f64 / self.requests as f64) * 100.0
        }
    }

    /// Computations registered but not yet settled
    pub fn in_flight(&self) -> u64 {
        self.factory_invocations
            .saturating_sub(self.succeeded + self.failed)
    }
}

impl fmt::Display for DedupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DedupStats {{ requests: {}, factory_invocations: {}, joined: {}, dedup_rate: {:.2}%, succeeded: {}, failed: {} }}",
            self.requests,
            self.factory_invocations,
            self.joined,
            self.dedup_rate(),
            self.succeeded,
            self.failed
        )
    }
}

/// Statistics for the normalized entity store
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of records currently held
    pub records: usize,

    /// Number of distinct collections with at least one record
    pub collections: usize,

    /// Number of successful normalization calls
    pub merges: u64,

    /// Number of record lookups
    pub reads: u64,

    /// Lookups that found a record
    pub hits: u64,

    /// Lookups that found nothing
    pub misses: u64,
}

impl StoreStats {
    /// Calculate lookup hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            (self.hits as f64 / self.reads as f64) * 100.0
        }
    }
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoreStats {{ records: {}, collections: {}, merges: {}, reads: {}, hits: {}, misses: {}, hit_rate: {:.2}% }}",
            self.records,
            self.collections,
            self.merges,
            self.reads,
            self.hits,
            self.misses,
            self.hit_rate()
        )
    }
}

/// Entity collections used by the app
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// User profiles
    Users,

    /// Generated media posts
    Posts,

    /// Comments on posts
    Comments,

    /// Likes on posts
    Likes,

    /// Follow edges between users
    Follows,

    /// Any other collection
    Custom(String),
}

impl Collection {
    /// Collection name as used in store keys
    pub fn as_str(&self) -> &str {
        match self {
            Collection::Users => "users",
            Collection::Posts => "posts",
            Collection::Comments => "comments",
            Collection::Likes => "likes",
            Collection::Follows => "follows",
            Collection::Custom(name) => name,
        }
    }
}

impl AsRef<str> for Collection {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_stats_rate() {
        let stats = DedupStats {
            requests: 10,
            factory_invocations: 2,
            joined: 8,
            succeeded: 1,
            failed: 0,
        };

        assert_eq!(stats.dedup_rate(), 80.0);
        assert_eq!(stats.in_flight(), 1);
    }

    #[test]
    fn test_dedup_stats_zero_requests() {
        let stats = DedupStats::default();
        assert_eq!(stats.dedup_rate(), 0.0);
        assert_eq!(stats.in_flight(), 0);
    }

    #[test]
    fn test_store_stats_hit_rate() {
        let stats = StoreStats {
            reads: 4,
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 75.0);
        assert!(format!("{}", stats).contains("hits: 3"));
    }

    #[test]
    fn test_collection_display() {
        assert_eq!(format!("{}", Collection::Users), "users");
        assert_eq!(format!("{}", Collection::Posts), "posts");
        assert_eq!(Collection::Custom("generations".to_string()).as_str(), "generations");
    }
}
