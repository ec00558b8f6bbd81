//! Request orchestration
//!
//! `RecommendationEngine` validates a request, serves it from the cache or
//! gathers signals, runs the selected scorer(s) and ranks the candidates.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

use crate::cache::{CacheKey, CacheStats, RecommendationCache, RecommendationStore};
use crate::config::RecommenderConfig;
use crate::error::{RecommenderError, Result};
use crate::hybrid::{rank_fallback, rank_single, ComponentVectors, HybridCombiner};
use crate::scoring::Scorer;
use crate::signals::{CatalogSource, ProfileSource, SignalFetcher};
use crate::types::{
    Algorithm, ItemId, RecommendationRequest, RecommendationResponse, RecommendationScope,
    SignalEvent,
};

/// Public description of one algorithm
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlgorithmInfo {
    pub id: Algorithm,
    pub name: &'static str,
    pub description: &'static str,
}

impl AlgorithmInfo {
    fn describe(algorithm: Algorithm) -> Self {
        let (name, description) = match algorithm {
            Algorithm::Popular => (
                "Popular",
                "Most enrolled and recently published content across the platform",
            ),
            Algorithm::ContentBased => (
                "Content-based",
                "Content similar to what you have already engaged with",
            ),
            Algorithm::Collaborative => (
                "Collaborative",
                "Content chosen by learners with similar enrollments",
            ),
            Algorithm::InterestsBased => (
                "Interests-based",
                "Content matching the interests in your profile",
            ),
            Algorithm::Hybrid => (
                "Hybrid",
                "A weighted blend of all other algorithms",
            ),
        };
        Self {
            id: algorithm,
            name,
            description,
        }
    }
}

pub struct RecommendationEngine {
    config: Arc<RecommenderConfig>,
    fetcher: SignalFetcher,
    cache: RecommendationCache,
}

impl RecommendationEngine {
    /// Engine with a process-local cache
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        profiles: Arc<dyn ProfileSource>,
        config: RecommenderConfig,
    ) -> Self {
        let cache = if config.cache.enabled {
            RecommendationCache::in_memory(config.cache_ttl())
        } else {
            RecommendationCache::disabled()
        };
        Self::with_cache(catalog, profiles, config, cache)
    }

    /// Engine caching into `store`, e.g. a shared Redis
    pub fn with_store(
        catalog: Arc<dyn CatalogSource>,
        profiles: Arc<dyn ProfileSource>,
        config: RecommenderConfig,
        store: Arc<dyn RecommendationStore>,
    ) -> Self {
        let cache = if config.cache.enabled {
            RecommendationCache::new(store, config.cache_ttl())
        } else {
            RecommendationCache::disabled()
        };
        Self::with_cache(catalog, profiles, config, cache)
    }

    fn with_cache(
        catalog: Arc<dyn CatalogSource>,
        profiles: Arc<dyn ProfileSource>,
        config: RecommenderConfig,
        cache: RecommendationCache,
    ) -> Self {
        let fetcher = SignalFetcher::new(catalog, profiles, config.collaborator_timeout());
        Self {
            config: Arc::new(config),
            fetcher,
            cache,
        }
    }

    /// Recommend site courses the user is not enrolled in
    pub async fn recommend_courses(
        &self,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        self.recommend(RecommendationScope::Courses, request).await
    }

    /// Recommend activities of `course_id` the user has not completed
    pub async fn recommend_activities(
        &self,
        request: &RecommendationRequest,
        course_id: ItemId,
    ) -> Result<RecommendationResponse> {
        self.recommend(RecommendationScope::Activities { course_id }, request)
            .await
    }

    #[instrument(
        skip(self, scope, request),
        fields(
            scope = %scope,
            user_id = request.user_id,
            algorithm = %request.algorithm,
            limit = request.limit,
        )
    )]
    async fn recommend(
        &self,
        scope: RecommendationScope,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        if request.limit == 0 {
            return Err(RecommenderError::InvalidLimit(0));
        }

        let key = CacheKey::new(scope, request.user_id, request.algorithm, request.limit);
        self.cache
            .get_or_compute(&key, request.force_refresh, || self.compute(scope, request))
            .await
    }

    async fn compute(
        &self,
        scope: RecommendationScope,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        let started = Instant::now();
        let selected = Scorer::for_algorithm(request.algorithm);
        let scorers = match selected {
            Some(scorer) => vec![scorer],
            None => Scorer::ALL.to_vec(),
        };

        let mut signals = self
            .fetcher
            .gather(scope, request.user_id, &scorers)
            .await?;
        if signals.candidates.is_empty() {
            info!("No candidates to rank");
            return Ok(RecommendationResponse::computed(
                Vec::new(),
                signals.degraded_names(),
            ));
        }

        let mut fallback = false;
        let recommendations = match selected {
            Some(scorer) => {
                let vector = scorer.compute(&signals, &self.config);
                if vector.is_empty() && scorer != Scorer::Popularity {
                    fallback = true;
                    self.fetcher
                        .supplement(&mut signals, Scorer::Popularity)
                        .await;
                    let popularity = Scorer::Popularity.compute(&signals, &self.config);
                    rank_fallback(
                        request.algorithm,
                        &popularity,
                        &signals.candidates,
                        request.limit,
                    )
                } else {
                    rank_single(scorer, &vector, &signals.candidates, request.limit)
                }
            }
            None => {
                let vectors = ComponentVectors::compute(&signals, &self.config);
                HybridCombiner::new(&self.config.hybrid).combine(
                    &vectors,
                    &signals.candidates,
                    request.limit,
                )
            }
        };

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            candidates = signals.candidates.len(),
            results = recommendations.len(),
            fallback,
            degraded = ?signals.degraded,
            "Recommendations computed"
        );

        Ok(RecommendationResponse::computed(
            recommendations,
            signals.degraded_names(),
        ))
    }

    /// Apply a signal-changing event to the cache. Later requests never see
    /// results computed before the event; store cleanup is not awaited.
    #[instrument(skip(self))]
    pub async fn notify(&self, event: SignalEvent) -> Result<()> {
        match event {
            SignalEvent::EnrollmentChanged { user_id }
            | SignalEvent::PreferencesUpdated { user_id } => {
                self.cache.invalidate_user(user_id).await?
            }
            SignalEvent::CatalogChanged => self.cache.invalidate_all().await?,
        }
        info!("Signal event applied");
        Ok(())
    }

    pub async fn clear_cache(&self, algorithm: Option<Algorithm>) -> Result<u64> {
        self.cache.clear(algorithm).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn algorithms(&self) -> Vec<AlgorithmInfo> {
        Algorithm::ALL
            .into_iter()
            .map(AlgorithmInfo::describe)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{InMemoryCatalog, InMemoryProfiles};
    use crate::types::Item;

    fn engine(catalog: InMemoryCatalog) -> RecommendationEngine {
        RecommendationEngine::new(
            Arc::new(catalog),
            Arc::new(InMemoryProfiles::new()),
            RecommenderConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_zero_limit_rejected_before_fetching() {
        let catalog = Arc::new(InMemoryCatalog::new().with_course(Item::course(10, "Rust")));
        let engine = RecommendationEngine::new(
            catalog.clone(),
            Arc::new(InMemoryProfiles::new()),
            RecommenderConfig::default(),
        );

        let result = engine
            .recommend_courses(&RecommendationRequest::new(5, Algorithm::Hybrid, 0))
            .await;

        assert!(matches!(result, Err(RecommenderError::InvalidLimit(0))));
        assert_eq!(catalog.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_catalog_gives_empty_list() {
        let engine = engine(InMemoryCatalog::new());

        for algorithm in Algorithm::ALL {
            let response = engine
                .recommend_courses(&RecommendationRequest::new(5, algorithm, 5))
                .await
                .unwrap();
            assert!(response.recommendations.is_empty());
        }
    }

    #[tokio::test]
    async fn test_cold_user_falls_back_to_popularity() {
        let catalog = InMemoryCatalog::new()
            .with_course(Item::course(10, "Rust"))
            .with_course(Item::course(11, "Go"))
            .with_enrollment(6, 10);
        let engine = engine(catalog);

        let response = engine
            .recommend_courses(&RecommendationRequest::new(5, Algorithm::ContentBased, 5))
            .await
            .unwrap();

        assert_eq!(response.recommendations.len(), 2);
        assert!(response
            .recommendations
            .iter()
            .all(|r| r.recommendation_reason.contains("not enough activity yet for content-based")));
    }

    #[test]
    fn test_algorithms_listed_in_order() {
        let engine = engine(InMemoryCatalog::new());
        let ids: Vec<Algorithm> = engine.algorithms().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, Algorithm::ALL.to_vec());
    }
}
