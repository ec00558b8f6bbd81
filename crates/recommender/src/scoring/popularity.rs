//! Popularity scoring
//!
//! Courses: weighted blend of capped enrollment count and recency, scaled to
//! `max_enrollment_score`. Activities: weighted completion/view count relative
//! to the most engaged activity of the course.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::config::PopularityConfig;
use crate::types::{EngagementKind, EngagementRecord, Item, ItemId, ScoreVector, UserId};

/// 1.0 within the recency period, linear decay to 0.0 at twice the period.
/// Items without a creation timestamp are not recent.
pub fn recency(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>, period_days: i64) -> f64 {
    let Some(created_at) = created_at else {
        return 0.0;
    };

    let period = Duration::days(period_days);
    let age = now - created_at;
    if age <= period {
        return 1.0;
    }

    let overdue = (age - period).num_seconds() as f64;
    let window = period.num_seconds() as f64;
    (1.0 - overdue / window).clamp(0.0, 1.0)
}

/// Score candidate courses from enrollment counts
pub fn score_courses(
    candidates: &[Item],
    enrollment_counts: &HashMap<ItemId, f64>,
    now: DateTime<Utc>,
    config: &PopularityConfig,
) -> ScoreVector {
    candidates
        .iter()
        .map(|item| {
            let score = match enrollment_counts.get(&item.id) {
                Some(&count) => {
                    let enrollment = count.max(0.0).min(config.enrollment_cap) / config.enrollment_cap;
                    let recent = recency(item.created_at, now, config.recency_period_days);
                    (config.enrollment_weight * enrollment + config.recency_weight * recent)
                        * config.max_enrollment_score
                }
                None => config.default_score,
            };
            (item.id, score)
        })
        .collect()
}

/// Weighted engagement per activity. A completion outweighs a view by the
/// same user; enrollment facts are ignored.
pub fn activity_counts(
    records: &[EngagementRecord],
    config: &PopularityConfig,
) -> HashMap<ItemId, f64> {
    let completed: HashSet<(UserId, ItemId)> = records
        .iter()
        .filter(|r| r.kind == EngagementKind::Completed)
        .map(|r| (r.user_id, r.item_id))
        .collect();
    let viewed: HashSet<(UserId, ItemId)> = records
        .iter()
        .filter(|r| r.kind == EngagementKind::Viewed)
        .map(|r| (r.user_id, r.item_id))
        .filter(|key| !completed.contains(key))
        .collect();

    let mut counts: HashMap<ItemId, f64> = HashMap::new();
    for (_, item_id) in &completed {
        *counts.entry(*item_id).or_insert(0.0) += config.activity_completion_weight;
    }
    for (_, item_id) in &viewed {
        *counts.entry(*item_id).or_insert(0.0) += config.activity_view_weight;
    }
    counts
}

/// Score candidate activities relative to the most engaged one.
/// Activities nobody touched score 0.
pub fn score_activities(
    candidates: &[Item],
    counts: &HashMap<ItemId, f64>,
    config: &PopularityConfig,
) -> ScoreVector {
    let max_count = candidates
        .iter()
        .filter_map(|item| counts.get(&item.id).copied())
        .fold(0.0_f64, f64::max);

    candidates
        .iter()
        .map(|item| {
            let count = counts.get(&item.id).copied().unwrap_or(0.0);
            let score = if max_count > 0.0 {
                count / max_count * config.max_enrollment_score
            } else {
                0.0
            };
            (item.id, score)
        })
        .collect()
}
