//! Cross-module scenario tests driven through `RecommendationEngine`


use std::sync::Arc;

use crate::config::RecommenderConfig;
use crate::engine::RecommendationEngine;
use crate::signals::{InMemoryCatalog, InMemoryProfiles};

pub(crate) fn engine_with(
    catalog: Arc<InMemoryCatalog>,
    profiles: Arc<InMemoryProfiles>,
) -> RecommendationEngine {
    RecommendationEngine::new(catalog, profiles, RecommenderConfig::default())
}
