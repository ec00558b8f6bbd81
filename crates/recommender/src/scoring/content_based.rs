//! Content-based filtering
//!
//! Compares candidate documents against the user's history in a TF-IDF
//! space, plus bonuses for shared categories and tags.

use std::collections::BTreeSet;
use tracing::debug;

use crate::config::ContentConfig;
use crate::text_similarity::{jaccard_similarity, similarity_to_queries, DocumentBuilder};
use crate::types::{Item, ScoreVector};

/// Content similarity scorer over one request's history and candidates
pub struct ContentBasedScorer<'a> {
    config: &'a ContentConfig,
    documents: DocumentBuilder,
}

impl<'a> ContentBasedScorer<'a> {
    pub fn new(config: &'a ContentConfig) -> Self {
        Self {
            config,
            documents: DocumentBuilder::from_config(config),
        }
    }

    /// Score candidates against the history. Empty history yields an empty
    /// vector; candidates below `similarity_threshold` are dropped.
    pub fn score(&self, history: &[Item], candidates: &[Item]) -> ScoreVector {
        if history.is_empty() || candidates.is_empty() {
            return ScoreVector::new();
        }

        let history_docs = self.documents.build_all(history);
        let candidate_docs = self.documents.build_all(candidates);
        let similarities =
            similarity_to_queries(&history_docs, &candidate_docs, self.config.aggregation);

        let history_categories: BTreeSet<String> = history
            .iter()
            .map(|item| normalize_label(&item.category))
            .filter(|category| !category.is_empty())
            .collect();
        let history_tags = normalized_tags(history.iter().flat_map(|item| item.tags.iter()));

        let mut scores = ScoreVector::new();
        for ((candidate, document), similarity) in
            candidates.iter().zip(&candidate_docs).zip(similarities)
        {
            let mut combined = self.config.content_similarity_weight * similarity;

            if document.chars().count() >= self.config.min_description_length {
                let category = normalize_label(&candidate.category);
                if !category.is_empty() && history_categories.contains(&category) {
                    combined += self.config.category_match_weight;
                }

                let candidate_tags = normalized_tags(candidate.tags.iter());
                combined +=
                    self.config.tag_match_weight * jaccard_similarity(&candidate_tags, &history_tags);
            }

            if combined >= self.config.similarity_threshold {
                scores.insert(candidate.id, combined);
            } else {
                debug!(item_id = candidate.id, score = combined, "Below content threshold");
            }
        }

        scores
    }
}

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

fn normalized_tags<'t>(tags: impl Iterator<Item = &'t String>) -> BTreeSet<String> {
    tags.map(|tag| normalize_label(tag))
        .filter(|tag| !tag.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<Item> {
        vec![Item::course(20, "Rust Ownership and Borrowing")
            .with_description("Memory safety with the borrow checker")
            .with_category("Programming")
            .with_tags(["rust", "systems"])]
    }

    #[test]
    fn test_empty_history_yields_empty_vector() {
        let config = ContentConfig::default();
        let scorer = ContentBasedScorer::new(&config);
        let candidates = vec![Item::course(30, "Anything")];
        assert!(scorer.score(&[], &candidates).is_empty());
    }

    #[test]
    fn test_similar_course_outranks_unrelated_course() {
        let config = ContentConfig::default();
        let scorer = ContentBasedScorer::new(&config);
        let candidates = vec![
            Item::course(30, "Advanced Rust Ownership")
                .with_description("Lifetimes and the borrow checker in depth")
                .with_category("Programming")
                .with_tags(["rust"]),
            Item::course(31, "Watercolor Landscapes")
                .with_description("Painting outdoor scenes with watercolor")
                .with_category("Arts"),
        ];

        let scores = scorer.score(&history(), &candidates);

        let related = scores.get(30).unwrap();
        // cosine + category bonus + 3.0 * jaccard({rust}, {rust, systems})
        assert!(related > 2.0 + 1.5);
        assert!(!scores.contains(31));
    }

    #[test]
    fn test_short_documents_get_no_bonus() {
        let config = ContentConfig {
            analyzed_course_fields: vec![crate::config::TextField::Name],
            min_description_length: 50,
            ..ContentConfig::default()
        };
        let scorer = ContentBasedScorer::new(&config);
        let candidates = vec![Item::course(30, "Knitting")
            .with_category("Programming")
            .with_tags(["rust"])];

        let scores = scorer.score(&history(), &candidates);
        assert!(!scores.contains(30));
    }

    #[test]
    fn test_threshold_is_configurable() {
        let config = ContentConfig {
            similarity_threshold: 10.0,
            ..ContentConfig::default()
        };
        let scorer = ContentBasedScorer::new(&config);
        let candidates = vec![Item::course(30, "Rust Ownership and Borrowing")
            .with_category("Programming")];

        assert!(scorer.score(&history(), &candidates).is_empty());
    }
}
