//! Core domain types for the recommender
//!
//! Items, engagement facts and interest profiles are read-only snapshots of
//! collaborator data. `ScoreVector` and `Recommendation` are the only values the
//! engine builds itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::RecommenderError;

pub type UserId = i64;
pub type ItemId = i64;

/// Moodle front-page course, never a recommendation candidate
pub const SITE_COURSE_ID: ItemId = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Course,
    Activity,
}

/// A recommendable unit: a course or an activity inside a course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub kind: ItemKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Course category name, or module name (quiz, forum, ...) for activities
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_course: Option<ItemId>,
}

impl Item {
    pub fn course(id: ItemId, name: impl Into<String>) -> Self {
        Self {
            id,
            kind: ItemKind::Course,
            name: name.into(),
            description: String::new(),
            category: String::new(),
            tags: BTreeSet::new(),
            created_at: None,
            parent_course: None,
        }
    }

    pub fn activity(id: ItemId, course_id: ItemId, name: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Activity,
            parent_course: Some(course_id),
            ..Self::course(id, name)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    Enrolled,
    Completed,
    Viewed,
}

/// A single user interaction fact sourced from the catalog collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementRecord {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub kind: EngagementKind,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl EngagementRecord {
    pub fn new(user_id: UserId, item_id: ItemId, kind: EngagementKind) -> Self {
        Self {
            user_id,
            item_id,
            kind,
            timestamp: None,
        }
    }

    pub fn enrolled(user_id: UserId, item_id: ItemId) -> Self {
        Self::new(user_id, item_id, EngagementKind::Enrolled)
    }

    pub fn completed(user_id: UserId, item_id: ItemId) -> Self {
        Self::new(user_id, item_id, EngagementKind::Completed)
    }

    pub fn viewed(user_id: UserId, item_id: ItemId) -> Self {
        Self::new(user_id, item_id, EngagementKind::Viewed)
    }
}

/// Declared interests of a user, order irrelevant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestProfile {
    pub user_id: UserId,
    pub interests: BTreeSet<String>,
}

impl InterestProfile {
    pub fn new<I, S>(user_id: UserId, interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_id,
            interests: interests.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            interests: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.interests.is_empty()
    }
}

/// Raw, algorithm-specific scores keyed by item id
///
/// Values are only comparable within one vector; the hybrid combiner
/// normalizes before blending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreVector(BTreeMap<ItemId, f64>);

impl ScoreVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item_id: ItemId, score: f64) {
        self.0.insert(item_id, score);
    }

    pub fn get(&self, item_id: ItemId) -> Option<f64> {
        self.0.get(&item_id).copied()
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.0.contains_key(&item_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemId, f64)> + '_ {
        self.0.iter().map(|(id, score)| (*id, *score))
    }

    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.0.keys().copied()
    }

    pub fn max_score(&self) -> Option<f64> {
        self.0.values().copied().reduce(f64::max)
    }

    pub fn min_score(&self) -> Option<f64> {
        self.0.values().copied().reduce(f64::min)
    }
}

impl FromIterator<(ItemId, f64)> for ScoreVector {
    fn from_iter<T: IntoIterator<Item = (ItemId, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Descending score, ascending id. Shared by every ranking in the crate.
pub(crate) fn compare_ranked(score_a: f64, id_a: ItemId, score_b: f64, id_b: ItemId) -> Ordering {
    score_b.total_cmp(&score_a).then_with(|| id_a.cmp(&id_b))
}

/// Recommendation algorithm selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "popular")]
    Popular,
    #[serde(rename = "content-based")]
    ContentBased,
    #[serde(rename = "collaborative")]
    Collaborative,
    #[serde(rename = "interests-based")]
    InterestsBased,
    #[serde(rename = "hybrid")]
    Hybrid,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Popular,
        Algorithm::ContentBased,
        Algorithm::Collaborative,
        Algorithm::InterestsBased,
        Algorithm::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Popular => "popular",
            Algorithm::ContentBased => "content-based",
            Algorithm::Collaborative => "collaborative",
            Algorithm::InterestsBased => "interests-based",
            Algorithm::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = RecommenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|algorithm| algorithm.as_str() == s)
            .ok_or_else(|| RecommenderError::UnknownAlgorithm(s.to_string()))
    }
}

/// What a request ranks: site courses, or activities of one course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum RecommendationScope {
    Courses,
    Activities { course_id: ItemId },
}

impl fmt::Display for RecommendationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendationScope::Courses => f.write_str("courses"),
            RecommendationScope::Activities { course_id } => write!(f, "course-{}", course_id),
        }
    }
}

/// Per-algorithm contribution, already normalized to [0, 1]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_based: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaborative: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interests_based: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: ItemId,
    pub name: String,
    pub kind: ItemKind,
    /// Final score in [0, 1]
    pub score: f64,
    pub components: ComponentScores,
    pub recommendation_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub recommendations: Vec<Recommendation>,
    /// Served from the cache without recomputation
    pub cached: bool,
    /// Signals that were unavailable while computing; never set on cached results
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_signals: Vec<String>,
}

impl RecommendationResponse {
    pub fn computed(recommendations: Vec<Recommendation>, degraded_signals: Vec<String>) -> Self {
        Self {
            recommendations,
            cached: false,
            degraded_signals,
        }
    }
}

/// Sort in place: score descending, item id ascending
pub fn sort_recommendations(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| compare_ranked(a.score, a.item_id, b.score, b.item_id));
}

/// Validated recommendation query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationRequest {
    pub user_id: UserId,
    pub algorithm: Algorithm,
    pub limit: usize,
    pub force_refresh: bool,
}

impl RecommendationRequest {
    pub fn new(user_id: UserId, algorithm: Algorithm, limit: usize) -> Self {
        Self {
            user_id,
            algorithm,
            limit,
            force_refresh: false,
        }
    }

    /// Parse untrusted input. Unknown algorithms and non-positive limits are
    /// rejected, never corrected.
    pub fn parse(
        user_id: UserId,
        algorithm: &str,
        limit: i64,
        force_refresh: bool,
    ) -> Result<Self, RecommenderError> {
        let algorithm = algorithm.parse::<Algorithm>()?;
        if limit <= 0 {
            return Err(RecommenderError::InvalidLimit(limit));
        }
        let limit = usize::try_from(limit).map_err(|_| RecommenderError::InvalidLimit(limit))?;

        Ok(Self {
            user_id,
            algorithm,
            limit,
            force_refresh,
        })
    }

    pub fn force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }
}

/// Signal-changing events that invalidate cached recommendations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalEvent {
    EnrollmentChanged { user_id: UserId },
    PreferencesUpdated { user_id: UserId },
    CatalogChanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_names_round_trip() {
        for algorithm in Algorithm::ALL {
            assert_eq!(algorithm.as_str().parse::<Algorithm>().unwrap(), algorithm);
        }
        assert!(matches!(
            "trending".parse::<Algorithm>(),
            Err(RecommenderError::UnknownAlgorithm(name)) if name == "trending"
        ));
    }

    #[test]
    fn test_algorithm_serde_uses_wire_names() {
        let json = serde_json::to_string(&Algorithm::InterestsBased).unwrap();
        assert_eq!(json, "\"interests-based\"");
    }

    #[test]
    fn test_sorting_breaks_ties_by_item_id() {
        let mut recommendations: Vec<Recommendation> = [(9, 0.5), (3, 0.5), (4, 0.9), (1, 0.1)]
            .into_iter()
            .map(|(item_id, score)| Recommendation {
                item_id,
                name: format!("Course {}", item_id),
                kind: ItemKind::Course,
                score,
                components: ComponentScores::default(),
                recommendation_reason: String::new(),
            })
            .collect();

        sort_recommendations(&mut recommendations);
        let ids: Vec<ItemId> = recommendations.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, vec![4, 3, 9, 1]);
    }

    #[test]
    fn test_request_parse_rejects_bad_input() {
        assert!(matches!(
            RecommendationRequest::parse(7, "hybrid", 0, false),
            Err(RecommenderError::InvalidLimit(0))
        ));
        assert!(matches!(
            RecommendationRequest::parse(7, "hybrid", -3, false),
            Err(RecommenderError::InvalidLimit(-3))
        ));
        assert!(matches!(
            RecommendationRequest::parse(7, "magic", 5, false),
            Err(RecommenderError::UnknownAlgorithm(_))
        ));

        let request = RecommendationRequest::parse(7, "collaborative", 3, true).unwrap();
        assert_eq!(request.algorithm, Algorithm::Collaborative);
        assert_eq!(request.limit, 3);
        assert!(request.force_refresh);
    }

    #[test]
    fn test_signal_event_wire_format() {
        let event: SignalEvent =
            serde_json::from_str(r#"{"type":"enrollment_changed","user_id":42}"#).unwrap();
        assert_eq!(event, SignalEvent::EnrollmentChanged { user_id: 42 });

        let event: SignalEvent = serde_json::from_str(r#"{"type":"catalog_changed"}"#).unwrap();
        assert_eq!(event, SignalEvent::CatalogChanged);
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(RecommendationScope::Courses.to_string(), "courses");
        assert_eq!(
            RecommendationScope::Activities { course_id: 12 }.to_string(),
            "course-12"
        );
    }
}
