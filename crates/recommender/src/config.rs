use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::RecommenderError;

const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Recommender Service Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RecommenderConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Catalog collaborator (Moodle web services)
    pub collaborators: CollaboratorConfig,

    /// Interest profile store
    pub database: DatabaseConfig,

    /// Recommendation cache
    pub cache: CacheConfig,

    pub popularity: PopularityConfig,

    pub content: ContentConfig,

    pub interests: InterestsConfig,

    pub collaborative: CollaborativeConfig,

    pub hybrid: HybridConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,

    /// Server port (default: 8090)
    pub port: u16,

    /// Worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            workers: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Moodle base URL, without the webservice path
    pub moodle_url: String,

    /// Moodle web service token
    pub moodle_token: String,

    /// Per-fetch timeout in milliseconds (default: 15000)
    pub timeout_ms: u64,

    /// Moodle calls in flight at once during per-course or per-user
    /// fan-out (default: 5)
    pub max_concurrent_requests: usize,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            moodle_url: "http://localhost:8080".to_string(),
            moodle_token: String::new(),
            timeout_ms: 15_000,
            max_concurrent_requests: 5,
        }
    }
}

impl CollaboratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Empty disables the interest store.
    pub url: String,

    /// Connection pool size
    pub max_connections: u32,

    /// Connection timeout
    pub connect_timeout_sec: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
            connect_timeout_sec: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    pub backend: CacheBackend,

    /// Redis connection URL, used when backend = "redis"
    pub redis_url: String,

    /// Recommendation TTL in seconds (default: 300)
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PopularityConfig {
    /// Share of the enrollment component (default: 0.8)
    pub enrollment_weight: f64,

    /// Share of the recency component (default: 0.2)
    pub recency_weight: f64,

    /// Upper bound of a popularity score (default: 5.0)
    pub max_enrollment_score: f64,

    /// Enrollment count that earns the full enrollment component (default: 50)
    pub enrollment_cap: f64,

    /// Items younger than this are fully recent (default: 30)
    pub recency_period_days: i64,

    /// Score for items without any enrollment data (default: 2.0)
    pub default_score: f64,

    /// Activity popularity: weight of one completion (default: 2.0)
    pub activity_completion_weight: f64,

    /// Activity popularity: weight of one view without completion (default: 1.0)
    pub activity_view_weight: f64,
}

impl Default for PopularityConfig {
    fn default() -> Self {
        Self {
            enrollment_weight: 0.8,
            recency_weight: 0.2,
            max_enrollment_score: 5.0,
            enrollment_cap: 50.0,
            recency_period_days: 30,
            default_score: 2.0,
            activity_completion_weight: 2.0,
            activity_view_weight: 1.0,
        }
    }
}

/// Item fields that feed a text document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    Name,
    Description,
    Category,
    Tags,
}

/// How a candidate is compared against several history documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityAggregation {
    /// Best match against any single history item
    Max,
    /// Match against the mean history vector
    Centroid,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentConfig {
    pub analyzed_course_fields: Vec<TextField>,

    pub analyzed_activity_fields: Vec<TextField>,

    /// Documents shorter than this get no category or tag bonus (default: 10)
    pub min_description_length: usize,

    /// Cleaned documents are truncated to this many characters (default: 10000)
    pub max_content_length: usize,

    /// Combined scores below this are dropped (default: 0.1)
    pub similarity_threshold: f64,

    /// Bonus when the candidate's category appears in the history (default: 2.0)
    pub category_match_weight: f64,

    /// Multiplier of the tag Jaccard coefficient (default: 3.0)
    pub tag_match_weight: f64,

    /// Multiplier of the TF-IDF cosine (default: 1.0)
    pub content_similarity_weight: f64,

    pub aggregation: SimilarityAggregation,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            analyzed_course_fields: vec![TextField::Name, TextField::Description, TextField::Category],
            analyzed_activity_fields: vec![TextField::Name, TextField::Description, TextField::Category],
            min_description_length: 10,
            max_content_length: 10_000,
            similarity_threshold: 0.1,
            category_match_weight: 2.0,
            tag_match_weight: 3.0,
            content_similarity_weight: 1.0,
            aggregation: SimilarityAggregation::Max,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InterestsConfig {
    /// Per interest found in the category or document text (default: 2.0)
    pub direct_interest_match_weight: f64,

    /// Per interest matching an item tag (default: 1.5)
    pub tag_match_weight: f64,

    /// Multiplier of the TF-IDF cosine against the interest query (default: 1.0)
    pub content_similarity_weight: f64,

    /// Scores below this are excluded (default: 0.2)
    pub item_score_threshold: f64,

    /// Cap of an interest score (default: 5.0)
    pub max_interest_score: f64,
}

impl Default for InterestsConfig {
    fn default() -> Self {
        Self {
            direct_interest_match_weight: 2.0,
            tag_match_weight: 1.5,
            content_similarity_weight: 1.0,
            item_score_threshold: 0.2,
            max_interest_score: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollaborativeConfig {
    /// Neighbors must share at least this many items (default: 1)
    pub min_common_courses: usize,

    /// Neighborhood size (default: 10)
    pub max_similar_users: usize,

    /// Minimum cosine similarity of a neighbor (default: 0.1)
    pub similarity_threshold: f64,

    pub enrollment_weight: f64,

    pub activity_completion_weight: f64,

    pub activity_view_weight: f64,
}

impl Default for CollaborativeConfig {
    fn default() -> Self {
        Self {
            min_common_courses: 1,
            max_similar_users: 10,
            similarity_threshold: 0.1,
            enrollment_weight: 1.0,
            activity_completion_weight: 3.0,
            activity_view_weight: 1.0,
        }
    }
}

/// What an empty score vector contributes to the hybrid blend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingSignalPolicy {
    /// Contribute `default_score_value` like any absent item
    DefaultScore,
    /// Contribute nothing
    Zero,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HybridConfig {
    /// Popularity weight (default: 0.15)
    pub popularity_weight: f64,

    /// Content similarity weight (default: 0.25)
    pub content_based_weight: f64,

    /// Collaborative weight (default: 0.25)
    pub collaborative_weight: f64,

    /// Interest match weight (default: 0.35)
    pub interests_based_weight: f64,

    /// Min-max normalize each vector before blending
    pub score_normalization: bool,

    /// Blended scores below this are excluded (default: 0.1)
    pub min_recommendation_score: f64,

    /// Component value of an item a scorer did not rank (default: 0.5)
    pub default_score_value: f64,

    pub missing_signal_policy: MissingSignalPolicy,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            popularity_weight: 0.15,
            content_based_weight: 0.25,
            collaborative_weight: 0.25,
            interests_based_weight: 0.35,
            score_normalization: true,
            min_recommendation_score: 0.1,
            default_score_value: 0.5,
            missing_signal_policy: MissingSignalPolicy::DefaultScore,
        }
    }
}

impl HybridConfig {
    pub fn weight_sum(&self) -> f64 {
        self.popularity_weight
            + self.content_based_weight
            + self.collaborative_weight
            + self.interests_based_weight
    }
}

impl RecommenderConfig {
    /// Load configuration from `.env`, config file and environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/recommender").required(false))
            .add_source(config::Environment::with_prefix("RECOMMENDER").separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would produce out-of-range scores
    pub fn validate(&self) -> Result<(), RecommenderError> {
        let hybrid_sum = self.hybrid.weight_sum();
        if (hybrid_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RecommenderError::Config(format!(
                "hybrid weights must sum to 1.0, got {:.3}",
                hybrid_sum
            )));
        }

        let popularity_sum = self.popularity.enrollment_weight + self.popularity.recency_weight;
        if (popularity_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RecommenderError::Config(format!(
                "popularity weights must sum to 1.0, got {:.3}",
                popularity_sum
            )));
        }

        if self.cache.ttl_secs == 0 {
            return Err(RecommenderError::Config("cache.ttl_secs must be positive".into()));
        }
        if self.collaborators.timeout_ms == 0 {
            return Err(RecommenderError::Config(
                "collaborators.timeout_ms must be positive".into(),
            ));
        }
        if self.collaborators.max_concurrent_requests == 0 {
            return Err(RecommenderError::Config(
                "collaborators.max_concurrent_requests must be positive".into(),
            ));
        }
        if self.popularity.enrollment_cap <= 0.0 || self.popularity.max_enrollment_score <= 0.0 {
            return Err(RecommenderError::Config(
                "popularity caps must be positive".into(),
            ));
        }
        if self.popularity.recency_period_days <= 0 {
            return Err(RecommenderError::Config(
                "popularity.recency_period_days must be positive".into(),
            ));
        }
        if self.interests.max_interest_score <= 0.0 {
            return Err(RecommenderError::Config(
                "interests.max_interest_score must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.hybrid.default_score_value) {
            return Err(RecommenderError::Config(
                "hybrid.default_score_value must be within [0, 1]".into(),
            ));
        }

        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl()
    }

    pub fn collaborator_timeout(&self) -> Duration {
        self.collaborators.timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RecommenderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.collaborators.timeout_ms, 15_000);
        assert!((config.hybrid.weight_sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_unbalanced_hybrid_weights() {
        let mut config = RecommenderConfig::default();
        config.hybrid.interests_based_weight = 0.9;
        assert!(matches!(config.validate(), Err(RecommenderError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_ttl() {
        let mut config = RecommenderConfig::default();
        config.cache.ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_request_concurrency() {
        let mut config = RecommenderConfig::default();
        assert_eq!(config.collaborators.max_concurrent_requests, 5);

        config.collaborators.max_concurrent_requests = 0;
        assert!(matches!(config.validate(), Err(RecommenderError::Config(_))));
    }

    #[test]
    fn test_partial_sections_fall_back_to_defaults() {
        let config: RecommenderConfig = serde_json::from_value(serde_json::json!({
            "cache": { "ttl_secs": 60 },
            "hybrid": { "missing_signal_policy": "zero" },
            "content": { "aggregation": "centroid" }
        }))
        .unwrap();

        assert_eq!(config.cache.ttl_secs, 60);
        assert!(config.cache.enabled);
        assert_eq!(config.hybrid.missing_signal_policy, MissingSignalPolicy::Zero);
        assert_eq!(config.hybrid.popularity_weight, 0.15);
        assert_eq!(config.content.aggregation, SimilarityAggregation::Centroid);
        assert_eq!(config.popularity.enrollment_cap, 50.0);
    }
}
