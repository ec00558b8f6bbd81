//! Hybrid combiner and single-algorithm ranking
//!
//! The combiner normalizes each scorer's vector to [0, 1], blends them with
//! the configured weights and explains every result by its strongest
//! contributions.

use std::collections::BTreeSet;
use tracing::debug;

use crate::config::{HybridConfig, MissingSignalPolicy, RecommenderConfig};
use crate::scoring::Scorer;
use crate::signals::SignalSnapshot;
use crate::types::{
    sort_recommendations, Algorithm, ComponentScores, Item, ItemId, Recommendation, ScoreVector,
};

/// The four raw score vectors of one request
#[derive(Debug, Clone, Default)]
pub struct ComponentVectors {
    pub popularity: ScoreVector,
    pub content_based: ScoreVector,
    pub collaborative: ScoreVector,
    pub interests_based: ScoreVector,
}

impl ComponentVectors {
    pub fn compute(signals: &SignalSnapshot, config: &RecommenderConfig) -> Self {
        let mut vectors = Self::default();
        for scorer in Scorer::ALL {
            vectors.set(scorer, scorer.compute(signals, config));
        }
        vectors
    }

    pub fn with(mut self, scorer: Scorer, vector: ScoreVector) -> Self {
        self.set(scorer, vector);
        self
    }

    pub fn set(&mut self, scorer: Scorer, vector: ScoreVector) {
        match scorer {
            Scorer::Popularity => self.popularity = vector,
            Scorer::ContentBased => self.content_based = vector,
            Scorer::Collaborative => self.collaborative = vector,
            Scorer::InterestsBased => self.interests_based = vector,
        }
    }

    pub fn get(&self, scorer: Scorer) -> &ScoreVector {
        match scorer {
            Scorer::Popularity => &self.popularity,
            Scorer::ContentBased => &self.content_based,
            Scorer::Collaborative => &self.collaborative,
            Scorer::InterestsBased => &self.interests_based,
        }
    }

    /// Items ranked by at least one scorer
    pub fn scored_items(&self) -> BTreeSet<ItemId> {
        Scorer::ALL
            .iter()
            .flat_map(|scorer| self.get(*scorer).item_ids())
            .collect()
    }
}

/// Min-max normalize to [0, 1]. A vector of equal values maps to 1.0.
pub fn normalize(vector: &ScoreVector) -> ScoreVector {
    let (Some(min), Some(max)) = (vector.min_score(), vector.max_score()) else {
        return ScoreVector::new();
    };

    let range = max - min;
    vector
        .iter()
        .map(|(item_id, score)| {
            let normalized = if range > f64::EPSILON {
                (score - min) / range
            } else {
                1.0
            };
            (item_id, normalized)
        })
        .collect()
}

fn set_component(components: &mut ComponentScores, scorer: Scorer, value: f64) {
    let slot = match scorer {
        Scorer::Popularity => &mut components.popularity,
        Scorer::ContentBased => &mut components.content_based,
        Scorer::Collaborative => &mut components.collaborative,
        Scorer::InterestsBased => &mut components.interests_based,
    };
    *slot = Some(value);
}

fn capitalize(phrase: &str) -> String {
    let mut chars = phrase.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Explain a blended score by its one or two largest contributions
fn explain(contributions: &[(Scorer, f64)]) -> String {
    let mut strongest: Vec<(Scorer, f64)> = contributions
        .iter()
        .copied()
        .filter(|(_, contribution)| *contribution > 0.0)
        .collect();
    strongest.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    match strongest.as_slice() {
        [] => "Recommended for you".to_string(),
        [(first, _)] => capitalize(first.phrase()),
        [(first, _), (second, _), ..] => {
            format!("{} and {}", capitalize(first.phrase()), second.phrase())
        }
    }
}

pub struct HybridCombiner<'a> {
    config: &'a HybridConfig,
}

impl<'a> HybridCombiner<'a> {
    pub fn new(config: &'a HybridConfig) -> Self {
        Self { config }
    }

    pub fn weight(&self, scorer: Scorer) -> f64 {
        match scorer {
            Scorer::Popularity => self.config.popularity_weight,
            Scorer::ContentBased => self.config.content_based_weight,
            Scorer::Collaborative => self.config.collaborative_weight,
            Scorer::InterestsBased => self.config.interests_based_weight,
        }
    }

    fn prepare(&self, vector: &ScoreVector) -> ScoreVector {
        if self.config.score_normalization {
            normalize(vector)
        } else {
            vector
                .iter()
                .map(|(item_id, score)| (item_id, score.clamp(0.0, 1.0)))
                .collect()
        }
    }

    fn absent_value(&self, vector: &ScoreVector) -> f64 {
        match (vector.is_empty(), self.config.missing_signal_policy) {
            (true, MissingSignalPolicy::Zero) => 0.0,
            _ => self.config.default_score_value,
        }
    }

    /// Blend the vectors over `candidates`, best first, at most `limit`
    pub fn combine(
        &self,
        vectors: &ComponentVectors,
        candidates: &[Item],
        limit: usize,
    ) -> Vec<Recommendation> {
        let prepared: Vec<(Scorer, ScoreVector)> = Scorer::ALL
            .iter()
            .map(|scorer| (*scorer, self.prepare(vectors.get(*scorer))))
            .collect();
        let scored = vectors.scored_items();

        let mut recommendations: Vec<Recommendation> = candidates
            .iter()
            .filter(|item| scored.contains(&item.id))
            .filter_map(|item| {
                let mut total = 0.0;
                let mut components = ComponentScores::default();
                let mut contributions = Vec::with_capacity(prepared.len());

                for (scorer, vector) in &prepared {
                    let weight = self.weight(*scorer);
                    let value = match vector.get(item.id) {
                        Some(value) => {
                            set_component(&mut components, *scorer, value);
                            contributions.push((*scorer, weight * value));
                            value
                        }
                        None => self.absent_value(vector),
                    };
                    total += weight * value;
                }

                let score = total.clamp(0.0, 1.0);
                if score < self.config.min_recommendation_score {
                    debug!(item_id = item.id, score, "Below minimum recommendation score");
                    return None;
                }

                Some(Recommendation {
                    item_id: item.id,
                    name: item.name.clone(),
                    kind: item.kind,
                    score,
                    components,
                    recommendation_reason: explain(&contributions),
                })
            })
            .collect();

        sort_recommendations(&mut recommendations);
        recommendations.truncate(limit);
        recommendations
    }
}

/// Rank one scorer's vector alone. Scores are scaled by the vector's maximum.
pub fn rank_single(
    scorer: Scorer,
    vector: &ScoreVector,
    candidates: &[Item],
    limit: usize,
) -> Vec<Recommendation> {
    let max = vector.max_score().unwrap_or(0.0);
    let reason = capitalize(scorer.phrase());

    let mut recommendations: Vec<Recommendation> = candidates
        .iter()
        .filter_map(|item| {
            let raw = vector.get(item.id)?;
            let score = if max > 0.0 {
                (raw / max).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut components = ComponentScores::default();
            set_component(&mut components, scorer, score);

            Some(Recommendation {
                item_id: item.id,
                name: item.name.clone(),
                kind: item.kind,
                score,
                components,
                recommendation_reason: reason.clone(),
            })
        })
        .collect();

    sort_recommendations(&mut recommendations);
    recommendations.truncate(limit);
    recommendations
}

/// Popularity ranking standing in for a personalized algorithm without data
pub fn rank_fallback(
    requested: Algorithm,
    popularity: &ScoreVector,
    candidates: &[Item],
    limit: usize,
) -> Vec<Recommendation> {
    let mut recommendations = rank_single(Scorer::Popularity, popularity, candidates, limit);
    for recommendation in &mut recommendations {
        recommendation.recommendation_reason = format!(
            "{} (not enough activity yet for {} recommendations)",
            recommendation.recommendation_reason, requested
        );
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[ItemId]) -> Vec<Item> {
        ids.iter()
            .map(|id| Item::course(*id, format!("Course {}", id)))
            .collect()
    }

    fn vector(entries: &[(ItemId, f64)]) -> ScoreVector {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_normalize() {
        let normalized = normalize(&vector(&[(1, 2.0), (2, 4.0), (3, 6.0)]));
        assert_eq!(normalized.get(1), Some(0.0));
        assert_eq!(normalized.get(2), Some(0.5));
        assert_eq!(normalized.get(3), Some(1.0));

        let flat = normalize(&vector(&[(1, 3.0), (2, 3.0)]));
        assert_eq!(flat.get(1), Some(1.0));
        assert_eq!(flat.get(2), Some(1.0));

        assert!(normalize(&ScoreVector::new()).is_empty());
    }

    #[test]
    fn test_absent_items_get_default_value() {
        let config = HybridConfig::default();
        let combiner = HybridCombiner::new(&config);
        let vectors = ComponentVectors::default()
            .with(Scorer::Popularity, vector(&[(10, 1.0), (11, 3.0)]))
            .with(Scorer::InterestsBased, vector(&[(10, 2.0)]));

        let recommendations = combiner.combine(&vectors, &items(&[10, 11]), 10);

        // item 10: pop 0.0, interests 1.0, content/collab default 0.5
        let first = recommendations.iter().find(|r| r.item_id == 10).unwrap();
        assert!((first.score - (0.35 + 0.25 * 0.5 + 0.25 * 0.5)).abs() < 1e-9);
        assert_eq!(first.components.interests_based, Some(1.0));
        assert_eq!(first.components.collaborative, None);

        // item 11: pop 1.0, interests default 0.5
        let second = recommendations.iter().find(|r| r.item_id == 11).unwrap();
        assert!((second.score - (0.15 + 0.35 * 0.5 + 0.25 * 0.5 + 0.25 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_zero_policy_ignores_empty_vectors() {
        let config = HybridConfig {
            missing_signal_policy: MissingSignalPolicy::Zero,
            ..HybridConfig::default()
        };
        let combiner = HybridCombiner::new(&config);
        let vectors =
            ComponentVectors::default().with(Scorer::Popularity, vector(&[(10, 5.0), (11, 1.0)]));

        let recommendations = combiner.combine(&vectors, &items(&[10, 11]), 10);

        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0].item_id, 10);
        assert!((recommendations[0].score - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_only_scored_candidates_are_ranked() {
        let config = HybridConfig::default();
        let combiner = HybridCombiner::new(&config);
        let vectors = ComponentVectors::default()
            .with(Scorer::Popularity, vector(&[(10, 1.0), (99, 5.0)]));

        let recommendations = combiner.combine(&vectors, &items(&[10, 11]), 10);
        let ids: Vec<ItemId> = recommendations.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, vec![10]);
    }

    #[test]
    fn test_sorted_by_score_then_id_and_truncated() {
        let config = HybridConfig::default();
        let combiner = HybridCombiner::new(&config);
        let vectors = ComponentVectors::default()
            .with(Scorer::Popularity, vector(&[(14, 2.0), (12, 2.0), (13, 1.0), (11, 2.0)]));

        let recommendations = combiner.combine(&vectors, &items(&[11, 12, 13, 14]), 3);
        let ids: Vec<ItemId> = recommendations.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, vec![11, 12, 14]);
        assert!(recommendations
            .iter()
            .all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[test]
    fn test_raw_scores_are_clamped_without_normalization() {
        let config = HybridConfig {
            score_normalization: false,
            ..HybridConfig::default()
        };
        let combiner = HybridCombiner::new(&config);
        let vectors = ComponentVectors::default()
            .with(Scorer::Popularity, vector(&[(10, 5.0)]))
            .with(Scorer::InterestsBased, vector(&[(10, 5.0)]))
            .with(Scorer::ContentBased, vector(&[(10, 3.0)]))
            .with(Scorer::Collaborative, vector(&[(10, 9.0)]));

        let recommendations = combiner.combine(&vectors, &items(&[10]), 5);
        assert!((recommendations[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_minimum_score_excludes_weak_items() {
        let config = HybridConfig {
            min_recommendation_score: 0.9,
            ..HybridConfig::default()
        };
        let combiner = HybridCombiner::new(&config);
        let vectors = ComponentVectors::default().with(Scorer::Popularity, vector(&[(10, 1.0)]));

        assert!(combiner.combine(&vectors, &items(&[10]), 5).is_empty());
    }

    #[test]
    fn test_reason_names_two_strongest_contributions() {
        let reason = explain(&[
            (Scorer::Popularity, 0.05),
            (Scorer::InterestsBased, 0.35),
            (Scorer::Collaborative, 0.2),
        ]);
        assert_eq!(
            reason,
            "Matches your interests and is popular among similar learners"
        );
        assert_eq!(explain(&[(Scorer::Popularity, 0.0)]), "Recommended for you");
    }

    #[test]
    fn test_rank_single_scales_by_max() {
        let recommendations = rank_single(
            Scorer::Popularity,
            &vector(&[(10, 4.0), (11, 0.8), (12, 0.08)]),
            &items(&[10, 11, 12]),
            2,
        );

        assert_eq!(recommendations.len(), 2);
        assert_eq!(recommendations[0].item_id, 10);
        assert_eq!(recommendations[0].score, 1.0);
        assert_eq!(recommendations[1].item_id, 11);
        assert!((recommendations[1].score - 0.2).abs() < 1e-9);
        assert_eq!(recommendations[0].components.popularity, Some(1.0));
    }

    #[test]
    fn test_fallback_reason_names_requested_algorithm() {
        let recommendations = rank_fallback(
            Algorithm::Collaborative,
            &vector(&[(10, 2.0)]),
            &items(&[10]),
            5,
        );
        assert!(recommendations[0]
            .recommendation_reason
            .contains("not enough activity yet for collaborative"));
    }
}
