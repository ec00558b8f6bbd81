//! Learning Gateway Recommender
//!
//! Recommends courses and in-course activities by blending four signal
//! sources: aggregate popularity, content similarity, peer behavior and
//! declared interests. Results are deterministic, explained and cached until
//! a signal-changing event or TTL expiry.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod hybrid;
pub mod scoring;
pub mod server;
pub mod signals;
pub mod text_similarity;
pub mod types;

// Re-export key types
pub use cache::{
    CacheError, CacheKey, CacheStats, InMemoryStore, RecommendationCache, RecommendationStore,
    RedisStore,
};
pub use config::RecommenderConfig;
pub use engine::{AlgorithmInfo, RecommendationEngine};
pub use error::{RecommenderError, Result};
pub use hybrid::{ComponentVectors, HybridCombiner};
pub use scoring::Scorer;
pub use signals::{
    CatalogSource, InMemoryCatalog, InMemoryProfiles, MoodleClient, PostgresInterestStore,
    ProfileSource, SignalFetcher, SignalSnapshot,
};
pub use types::*;

#[cfg(test)]
mod tests;
