//! Interest matching against declared user interests

use crate::config::{InterestsConfig, SimilarityAggregation};
use crate::text_similarity::{clean_text, similarity_to_queries, DocumentBuilder};
use crate::types::{InterestProfile, Item, ScoreVector};

pub struct InterestMatcher<'a> {
    config: &'a InterestsConfig,
    documents: &'a DocumentBuilder,
}

impl<'a> InterestMatcher<'a> {
    pub fn new(config: &'a InterestsConfig, documents: &'a DocumentBuilder) -> Self {
        Self { config, documents }
    }

    pub fn score(&self, profile: &InterestProfile, candidates: &[Item]) -> ScoreVector {
        let interests: Vec<String> = profile
            .interests
            .iter()
            .map(|interest| clean_text(interest, usize::MAX))
            .filter(|interest| !interest.is_empty())
            .collect();
        if interests.is_empty() || candidates.is_empty() {
            return ScoreVector::new();
        }

        let documents = self.documents.build_all(candidates);
        let query = vec![interests.join(" ")];
        let similarities = similarity_to_queries(&query, &documents, SimilarityAggregation::Max);

        let mut scores = ScoreVector::new();
        for ((candidate, document), similarity) in
            candidates.iter().zip(&documents).zip(similarities)
        {
            let category = clean_text(&candidate.category, usize::MAX);
            let tags: Vec<String> = candidate
                .tags
                .iter()
                .map(|tag| clean_text(tag, usize::MAX))
                .filter(|tag| !tag.is_empty())
                .collect();

            let direct_hits = interests
                .iter()
                .filter(|interest| **interest == category || contains_phrase(document, interest))
                .count();
            let tag_hits = interests
                .iter()
                .filter(|interest| {
                    tags.iter()
                        .any(|tag| tag.contains(interest.as_str()) || interest.contains(tag.as_str()))
                })
                .count();

            let score = (direct_hits as f64 * self.config.direct_interest_match_weight
                + tag_hits as f64 * self.config.tag_match_weight
                + similarity * self.config.content_similarity_weight)
                .min(self.config.max_interest_score);

            if score > 0.0 && score >= self.config.item_score_threshold {
                scores.insert(candidate.id, score);
            }
        }

        scores
    }
}

/// Whole-word phrase containment on cleaned text
fn contains_phrase(document: &str, phrase: &str) -> bool {
    format!(" {} ", document).contains(&format!(" {} ", phrase))
}
