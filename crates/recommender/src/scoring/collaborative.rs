//! User-based collaborative filtering
//!
//! Builds a weighted user×item engagement matrix, finds the target user's
//! nearest neighbors by cosine similarity and scores items the target has
//! not engaged with by similarity-weighted neighbor engagement.

use ndarray::Array2;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::config::CollaborativeConfig;
use crate::text_similarity::cosine_similarity;
use crate::types::{EngagementKind, EngagementRecord, ItemId, ScoreVector, UserId};

/// Dense user×item engagement strengths, rows and columns in ascending id order
#[derive(Debug, Clone)]
pub struct EngagementMatrix {
    users: Vec<UserId>,
    items: Vec<ItemId>,
    user_index: HashMap<UserId, usize>,
    values: Array2<f64>,
}

impl EngagementMatrix {
    /// Duplicate facts (same user, item and kind) count once
    pub fn from_records(records: &[EngagementRecord], config: &CollaborativeConfig) -> Self {
        let facts: HashSet<(UserId, ItemId, EngagementKind)> = records
            .iter()
            .map(|r| (r.user_id, r.item_id, r.kind))
            .collect();

        let users: Vec<UserId> = facts
            .iter()
            .map(|(user, _, _)| *user)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let items: Vec<ItemId> = facts
            .iter()
            .map(|(_, item, _)| *item)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let user_index: HashMap<UserId, usize> =
            users.iter().enumerate().map(|(i, u)| (*u, i)).collect();
        let item_index: HashMap<ItemId, usize> =
            items.iter().enumerate().map(|(i, item)| (*item, i)).collect();

        let mut values = Array2::zeros((users.len(), items.len()));
        for (user, item, kind) in &facts {
            let strength = match kind {
                EngagementKind::Enrolled => config.enrollment_weight,
                EngagementKind::Completed => config.activity_completion_weight,
                EngagementKind::Viewed => config.activity_view_weight,
            };
            values[[user_index[user], item_index[item]]] += strength;
        }

        Self {
            users,
            items,
            user_index,
            values,
        }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn contains_user(&self, user_id: UserId) -> bool {
        self.user_index.contains_key(&user_id)
    }

    /// Items the user has any engagement with
    pub fn engaged_items(&self, user_id: UserId) -> BTreeSet<ItemId> {
        let Some(&row) = self.user_index.get(&user_id) else {
            return BTreeSet::new();
        };
        self.values
            .row(row)
            .iter()
            .zip(&self.items)
            .filter(|(strength, _)| **strength > 0.0)
            .map(|(_, item)| *item)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub user_id: UserId,
    pub similarity: f64,
    pub common_items: usize,
}

pub struct CollaborativeScorer<'a> {
    config: &'a CollaborativeConfig,
}

impl<'a> CollaborativeScorer<'a> {
    pub fn new(config: &'a CollaborativeConfig) -> Self {
        Self { config }
    }

    /// Most similar users, similarity descending then user id ascending
    pub fn similar_users(&self, matrix: &EngagementMatrix, user_id: UserId) -> Vec<Neighbor> {
        let Some(&target_row) = matrix.user_index.get(&user_id) else {
            return Vec::new();
        };
        let target = matrix.values.row(target_row);

        let mut neighbors: Vec<Neighbor> = matrix
            .users
            .iter()
            .enumerate()
            .filter(|(_, other)| **other != user_id)
            .filter_map(|(row, other)| {
                let candidate = matrix.values.row(row);
                let common_items = target
                    .iter()
                    .zip(candidate.iter())
                    .filter(|(a, b)| **a > 0.0 && **b > 0.0)
                    .count();
                if common_items < self.config.min_common_courses.max(1) {
                    return None;
                }

                let similarity = cosine_similarity(target, candidate);
                if similarity < self.config.similarity_threshold {
                    return None;
                }

                Some(Neighbor {
                    user_id: *other,
                    similarity,
                    common_items,
                })
            })
            .collect();

        neighbors.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        neighbors.truncate(self.config.max_similar_users);
        neighbors
    }

    /// Score `candidates` the target has not engaged with. No qualifying
    /// neighbors yields an empty vector.
    pub fn score(
        &self,
        records: &[EngagementRecord],
        user_id: UserId,
        candidates: &BTreeSet<ItemId>,
    ) -> ScoreVector {
        let matrix = EngagementMatrix::from_records(records, self.config);
        if !matrix.contains_user(user_id) {
            debug!(user_id, "User has no engagement to compare");
            return ScoreVector::new();
        }

        let neighbors = self.similar_users(&matrix, user_id);
        if neighbors.is_empty() {
            debug!(user_id, users = matrix.user_count(), "No similar users found");
            return ScoreVector::new();
        }

        let engaged = matrix.engaged_items(user_id);
        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        for neighbor in &neighbors {
            let row = matrix.values.row(matrix.user_index[&neighbor.user_id]);
            for (strength, item) in row.iter().zip(&matrix.items) {
                if *strength > 0.0 && !engaged.contains(item) && candidates.contains(item) {
                    *scores.entry(*item).or_insert(0.0) += neighbor.similarity * strength;
                }
            }
        }

        debug!(
            user_id,
            neighbors = neighbors.len(),
            scored = scores.len(),
            "Collaborative scores computed"
        );
        scores.into_iter().collect()
    }
}
