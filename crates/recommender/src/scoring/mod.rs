//! Scorers
//!
//! Every scorer turns a request's signal snapshot into a raw `ScoreVector`.
//! Scores are only comparable within one vector.

pub mod collaborative;
pub mod content_based;
pub mod interests;
pub mod popularity;

pub use collaborative::{CollaborativeScorer, EngagementMatrix, Neighbor};
pub use content_based::ContentBasedScorer;
pub use interests::InterestMatcher;

use std::collections::BTreeSet;

use crate::config::RecommenderConfig;
use crate::signals::SignalSnapshot;
use crate::text_similarity::DocumentBuilder;
use crate::types::{Algorithm, ItemId, RecommendationScope, ScoreVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scorer {
    Popularity,
    ContentBased,
    Collaborative,
    InterestsBased,
}

impl Scorer {
    pub const ALL: [Scorer; 4] = [
        Scorer::Popularity,
        Scorer::ContentBased,
        Scorer::Collaborative,
        Scorer::InterestsBased,
    ];

    /// `None` for the hybrid algorithm, which blends all scorers
    pub fn for_algorithm(algorithm: Algorithm) -> Option<Self> {
        match algorithm {
            Algorithm::Popular => Some(Scorer::Popularity),
            Algorithm::ContentBased => Some(Scorer::ContentBased),
            Algorithm::Collaborative => Some(Scorer::Collaborative),
            Algorithm::InterestsBased => Some(Scorer::InterestsBased),
            Algorithm::Hybrid => None,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Scorer::Popularity => Algorithm::Popular,
            Scorer::ContentBased => Algorithm::ContentBased,
            Scorer::Collaborative => Algorithm::Collaborative,
            Scorer::InterestsBased => Algorithm::InterestsBased,
        }
    }

    pub fn name(&self) -> &'static str {
        self.algorithm().as_str()
    }

    /// Reason fragment, phrased to follow "it"
    pub fn phrase(&self) -> &'static str {
        match self {
            Scorer::Popularity => "is popular across the platform",
            Scorer::ContentBased => "is similar to content you have engaged with",
            Scorer::Collaborative => "is popular among similar learners",
            Scorer::InterestsBased => "matches your interests",
        }
    }

    pub fn compute(&self, signals: &SignalSnapshot, config: &RecommenderConfig) -> ScoreVector {
        match self {
            Scorer::Popularity => match signals.scope {
                RecommendationScope::Courses => popularity::score_courses(
                    &signals.candidates,
                    &signals.popularity_counts,
                    signals.as_of,
                    &config.popularity,
                ),
                RecommendationScope::Activities { .. } => {
                    let counts = popularity::activity_counts(&signals.engagement, &config.popularity);
                    popularity::score_activities(&signals.candidates, &counts, &config.popularity)
                }
            },
            Scorer::ContentBased => {
                ContentBasedScorer::new(&config.content).score(&signals.history, &signals.candidates)
            }
            Scorer::Collaborative => {
                let candidates: BTreeSet<ItemId> =
                    signals.candidates.iter().map(|item| item.id).collect();
                CollaborativeScorer::new(&config.collaborative).score(
                    &signals.engagement,
                    signals.user_id,
                    &candidates,
                )
            }
            Scorer::InterestsBased => {
                let documents = DocumentBuilder::from_config(&config.content);
                InterestMatcher::new(&config.interests, &documents)
                    .score(&signals.interests, &signals.candidates)
            }
        }
    }
}
