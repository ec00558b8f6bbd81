//! Signal fetchers
//!
//! Collaborator traits for the course catalog and the interest profile store,
//! plus `SignalFetcher`, which gathers one request's snapshot under a
//! per-fetch timeout. A failed optional fetch degrades the dependent scorer
//! to an empty vector; only the candidate listing itself is fatal.

pub mod memory;
pub mod moodle;
pub mod profile_store;

pub use memory::{InMemoryCatalog, InMemoryProfiles};
pub use moodle::MoodleClient;
pub use profile_store::PostgresInterestStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::RecommenderError;
use crate::scoring::Scorer;
use crate::types::{
    EngagementKind, EngagementRecord, InterestProfile, Item, ItemId, RecommendationScope, UserId,
    SITE_COURSE_ID,
};

/// Course catalog and engagement data
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    /// All courses of the site
    async fn list_courses(&self) -> Result<Vec<Item>>;

    /// Enrollment records of every user in every course
    async fn enrollments(&self) -> Result<Vec<EngagementRecord>>;

    /// Ids of the courses a user is enrolled in
    async fn user_courses(&self, user_id: UserId) -> Result<Vec<ItemId>> {
        Ok(self
            .enrollments()
            .await?
            .into_iter()
            .filter(|record| record.user_id == user_id)
            .map(|record| record.item_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// Number of enrolled users per course
    async fn enrollment_counts(&self) -> Result<HashMap<ItemId, u64>> {
        let mut counts = HashMap::new();
        let distinct: BTreeSet<(ItemId, UserId)> = self
            .enrollments()
            .await?
            .into_iter()
            .map(|record| (record.item_id, record.user_id))
            .collect();
        for (item_id, _) in distinct {
            *counts.entry(item_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Activities of one course
    async fn course_activities(&self, course_id: ItemId) -> Result<Vec<Item>>;

    /// Completion and view records of every enrolled user within one course
    async fn activity_engagement(&self, course_id: ItemId) -> Result<Vec<EngagementRecord>>;
}

/// Declared user interests
#[async_trait::async_trait]
pub trait ProfileSource: Send + Sync {
    async fn interests(&self, user_id: UserId) -> Result<InterestProfile>;
}

/// One collaborator fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signal {
    Catalog,
    UserCourses,
    EnrollmentCounts,
    Enrollments,
    CourseActivities,
    ActivityEngagement,
    Interests,
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Catalog => "catalog",
            Signal::UserCourses => "user_courses",
            Signal::EnrollmentCounts => "enrollment_counts",
            Signal::Enrollments => "enrollments",
            Signal::CourseActivities => "course_activities",
            Signal::ActivityEngagement => "activity_engagement",
            Signal::Interests => "interests",
        }
    }

    pub fn collaborator(&self) -> &'static str {
        match self {
            Signal::Interests => "profile store",
            _ => "course catalog",
        }
    }
}

/// Everything the scorers need for one request
#[derive(Debug, Clone)]
pub struct SignalSnapshot {
    pub scope: RecommendationScope,
    pub user_id: UserId,
    pub as_of: DateTime<Utc>,
    /// Items eligible for recommendation
    pub candidates: Vec<Item>,
    /// Items the user already engaged with
    pub history: Vec<Item>,
    pub interests: InterestProfile,
    /// Course enrollment counts; unused for activities
    pub popularity_counts: HashMap<ItemId, f64>,
    /// Enrollment records (courses) or completion/view records (activities)
    pub engagement: Vec<EngagementRecord>,
    /// Signals that could not be fetched
    pub degraded: BTreeSet<Signal>,
}

impl SignalSnapshot {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn degraded_names(&self) -> Vec<String> {
        self.degraded.iter().map(|s| s.name().to_string()).collect()
    }
}

/// Gathers signal snapshots from the collaborators
pub struct SignalFetcher {
    catalog: Arc<dyn CatalogSource>,
    profiles: Arc<dyn ProfileSource>,
    timeout: Duration,
}

impl SignalFetcher {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        profiles: Arc<dyn ProfileSource>,
        timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            profiles,
            timeout,
        }
    }

    /// Fetch the signals `scorers` depend on. Errors only when the candidate
    /// listing cannot be fetched.
    #[instrument(skip(self, scope, scorers), fields(scope = %scope))]
    pub async fn gather(
        &self,
        scope: RecommendationScope,
        user_id: UserId,
        scorers: &[Scorer],
    ) -> Result<SignalSnapshot, RecommenderError> {
        let mut snapshot = match scope {
            RecommendationScope::Courses => self.gather_courses(user_id, scorers).await?,
            RecommendationScope::Activities { course_id } => {
                self.gather_activities(user_id, course_id).await?
            }
        };

        if scorers.contains(&Scorer::InterestsBased) {
            let interests = self
                .fetch(Signal::Interests, self.profiles.interests(user_id))
                .await;
            snapshot.interests = degrade(Some(interests), Signal::Interests, &mut snapshot.degraded)
                .unwrap_or_else(|| InterestProfile::empty(user_id));
        }

        debug!(
            candidates = snapshot.candidates.len(),
            history = snapshot.history.len(),
            engagement = snapshot.engagement.len(),
            degraded = ?snapshot.degraded,
            "Signals gathered"
        );
        Ok(snapshot)
    }

    /// Add the signals of `scorer` to an existing snapshot
    pub async fn supplement(&self, snapshot: &mut SignalSnapshot, scorer: Scorer) {
        match (scorer, snapshot.scope) {
            (Scorer::Popularity, RecommendationScope::Courses) => {
                let counts = self
                    .fetch(Signal::EnrollmentCounts, self.catalog.enrollment_counts())
                    .await;
                snapshot.popularity_counts =
                    degrade(Some(counts), Signal::EnrollmentCounts, &mut snapshot.degraded)
                        .map(to_float_counts)
                        .unwrap_or_default();
            }
            (Scorer::Collaborative, RecommendationScope::Courses) => {
                let enrollments = self
                    .fetch(Signal::Enrollments, self.catalog.enrollments())
                    .await;
                snapshot.engagement =
                    degrade(Some(enrollments), Signal::Enrollments, &mut snapshot.degraded)
                        .unwrap_or_default();
            }
            (Scorer::InterestsBased, _) => {
                let interests = self
                    .fetch(Signal::Interests, self.profiles.interests(snapshot.user_id))
                    .await;
                snapshot.interests =
                    degrade(Some(interests), Signal::Interests, &mut snapshot.degraded)
                        .unwrap_or_else(|| InterestProfile::empty(snapshot.user_id));
            }
            // Content history and activity engagement are always part of the snapshot
            _ => {}
        }
    }

    async fn gather_courses(
        &self,
        user_id: UserId,
        scorers: &[Scorer],
    ) -> Result<SignalSnapshot, RecommenderError> {
        let wants_counts = scorers.contains(&Scorer::Popularity);
        let wants_enrollments = scorers.contains(&Scorer::Collaborative);

        let (courses, enrolled, counts, enrollments) = tokio::join!(
            self.fetch(Signal::Catalog, self.catalog.list_courses()),
            self.fetch(Signal::UserCourses, self.catalog.user_courses(user_id)),
            self.fetch_if(wants_counts, Signal::EnrollmentCounts, self.catalog.enrollment_counts()),
            self.fetch_if(wants_enrollments, Signal::Enrollments, self.catalog.enrollments()),
        );

        let courses = courses?;
        let mut degraded = BTreeSet::new();
        let enrolled: BTreeSet<ItemId> = degrade(Some(enrolled), Signal::UserCourses, &mut degraded)
            .unwrap_or_default()
            .into_iter()
            .collect();

        let (history, candidates): (Vec<Item>, Vec<Item>) = courses
            .into_iter()
            .filter(|course| course.id != SITE_COURSE_ID)
            .partition(|course| enrolled.contains(&course.id));

        let popularity_counts = degrade(counts, Signal::EnrollmentCounts, &mut degraded)
            .map(to_float_counts)
            .unwrap_or_default();
        let engagement = degrade(enrollments, Signal::Enrollments, &mut degraded).unwrap_or_default();

        Ok(SignalSnapshot {
            scope: RecommendationScope::Courses,
            user_id,
            as_of: Utc::now(),
            candidates,
            history,
            interests: InterestProfile::empty(user_id),
            popularity_counts,
            engagement,
            degraded,
        })
    }

    async fn gather_activities(
        &self,
        user_id: UserId,
        course_id: ItemId,
    ) -> Result<SignalSnapshot, RecommenderError> {
        let (activities, engagement) = tokio::join!(
            self.fetch(Signal::CourseActivities, self.catalog.course_activities(course_id)),
            self.fetch(Signal::ActivityEngagement, self.catalog.activity_engagement(course_id)),
        );

        let activities = activities?;
        let mut degraded = BTreeSet::new();
        let engagement: Vec<EngagementRecord> =
            degrade(Some(engagement), Signal::ActivityEngagement, &mut degraded)
                .unwrap_or_default()
                .into_iter()
                .filter(|record| record.kind != EngagementKind::Enrolled)
                .collect();

        let completed: BTreeSet<ItemId> = engagement
            .iter()
            .filter(|r| r.user_id == user_id && r.kind == EngagementKind::Completed)
            .map(|r| r.item_id)
            .collect();
        let touched: BTreeSet<ItemId> = engagement
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.item_id)
            .collect();

        let history = activities
            .iter()
            .filter(|activity| touched.contains(&activity.id))
            .cloned()
            .collect();
        let candidates = activities
            .into_iter()
            .filter(|activity| !completed.contains(&activity.id))
            .collect();

        Ok(SignalSnapshot {
            scope: RecommendationScope::Activities { course_id },
            user_id,
            as_of: Utc::now(),
            candidates,
            history,
            interests: InterestProfile::empty(user_id),
            popularity_counts: HashMap::new(),
            engagement,
            degraded,
        })
    }

    /// Run one collaborator call under the fetch timeout
    async fn fetch<T, F>(&self, signal: Signal, call: F) -> Result<T, RecommenderError>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RecommenderError::CollaboratorUnreachable {
                collaborator: signal.collaborator(),
                reason: format!("{}: {:#}", signal.name(), e),
            }),
            Err(_) => Err(RecommenderError::Timeout {
                collaborator: signal.collaborator(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn fetch_if<T, F>(
        &self,
        wanted: bool,
        signal: Signal,
        call: F,
    ) -> Option<Result<T, RecommenderError>>
    where
        F: Future<Output = Result<T>>,
    {
        if !wanted {
            return None;
        }
        Some(self.fetch(signal, call).await)
    }
}

/// Log and record a failed optional fetch. `None` when the signal was not
/// requested or is unavailable.
fn degrade<T>(
    result: Option<Result<T, RecommenderError>>,
    signal: Signal,
    degraded: &mut BTreeSet<Signal>,
) -> Option<T> {
    match result? {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(signal = signal.name(), error = %e, "Signal unavailable, degrading");
            degraded.insert(signal);
            None
        }
    }
}

fn to_float_counts(counts: HashMap<ItemId, u64>) -> HashMap<ItemId, f64> {
    counts
        .into_iter()
        .map(|(item_id, count)| (item_id, count as f64))
        .collect()
}
